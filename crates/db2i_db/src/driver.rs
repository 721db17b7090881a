//! Driver seam for the Db2 for i wire protocol.
//!
//! The actual wire driver lives outside this repository; production
//! builds inject an implementation of [`Db2Driver`] at startup. The
//! in-memory driver in [`crate::testing`] satisfies the same contract
//! for tests and transport smoke runs.

use async_trait::async_trait;
use db2i_protocol::IbmiCredentials;
use db2i_sql::SqlValue;
use serde_json::{Map, Value};
use thiserror::Error;

/// Failures surfaced by a driver implementation.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Execution failed: {message}")]
    Execute {
        message: String,
        sql_state: Option<String>,
        sql_rc: i32,
    },

    #[error("Connection closed")]
    Closed,
}

/// Column metadata reported alongside a result set.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One execution (or fetch) round-trip result.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub data: Vec<Map<String, Value>>,
    pub columns: Vec<ColumnMeta>,
    pub sql_rc: i32,
    pub sql_state: Option<String>,
    pub has_results: bool,
    pub update_count: Option<u64>,
    /// False while more rows can be pulled with `fetch_more`.
    pub is_done: bool,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// An empty successful outcome.
    pub fn ok() -> Self {
        Self {
            success: true,
            is_done: true,
            ..Default::default()
        }
    }

    /// Append another fetch round onto this outcome.
    pub fn absorb(&mut self, mut next: ExecutionOutcome) {
        self.data.append(&mut next.data);
        self.is_done = next.is_done;
        self.execution_time_ms += next.execution_time_ms;
        if self.columns.is_empty() {
            self.columns = next.columns;
        }
    }
}

/// Factory for live connections.
#[async_trait]
pub trait Db2Driver: Send + Sync {
    async fn connect(
        &self,
        credentials: &IbmiCredentials,
    ) -> Result<Box<dyn Db2Connection>, DriverError>;
}

/// A single live connection. The driver's own session serializes
/// statements on one connection; different connections may interleave.
#[async_trait]
pub trait Db2Connection: Send {
    /// Run a prepared statement with bind values, pulling at most
    /// `fetch_size` rows into the first result chunk.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        fetch_size: usize,
    ) -> Result<ExecutionOutcome, DriverError>;

    /// Pull the next chunk of the open result set.
    async fn fetch_more(&mut self, fetch_size: usize) -> Result<ExecutionOutcome, DriverError>;

    /// Liveness probe used on checkout.
    async fn ping(&mut self) -> bool;

    async fn close(&mut self);
}
