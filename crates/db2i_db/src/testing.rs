//! Deterministic in-memory driver for tests and transport smoke runs.
//!
//! Records every executed statement with its bind vector, serves canned
//! result sets, and chunks rows by `fetch_size` so pagination paths are
//! exercised for real.

use crate::driver::{ColumnMeta, Db2Connection, Db2Driver, DriverError, ExecutionOutcome};
use async_trait::async_trait;
use db2i_protocol::IbmiCredentials;
use db2i_sql::SqlValue;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Shared {
    default_rows: Vec<Map<String, Value>>,
    queued: Mutex<VecDeque<ExecutionOutcome>>,
    executed: Mutex<Vec<(String, Vec<SqlValue>)>>,
    connect_count: AtomicUsize,
    fail_connects: bool,
}

/// Driver whose connections replay configured results.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows served (chunked by fetch size) for any statement without a
    /// queued response.
    pub fn with_default_rows(self, rows: Vec<Map<String, Value>>) -> Self {
        let mut shared = Shared {
            default_rows: rows,
            fail_connects: self.shared.fail_connects,
            ..Default::default()
        };
        shared.connect_count = AtomicUsize::new(self.shared.connect_count.load(Ordering::SeqCst));
        Self { shared: Arc::new(shared) }
    }

    /// Every connect attempt fails.
    pub fn failing_connects(self) -> Self {
        Self {
            shared: Arc::new(Shared {
                default_rows: self.shared.default_rows.clone(),
                fail_connects: true,
                ..Default::default()
            }),
        }
    }

    /// Queue one response consumed by the next execute call.
    pub fn push_response(&self, outcome: ExecutionOutcome) {
        self.shared.queued.lock().unwrap().push_back(outcome);
    }

    /// Statements seen so far, with their bind vectors.
    pub fn executed(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.shared.executed.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.shared.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Db2Driver for MemoryDriver {
    async fn connect(
        &self,
        _credentials: &IbmiCredentials,
    ) -> Result<Box<dyn Db2Connection>, DriverError> {
        if self.shared.fail_connects {
            return Err(DriverError::Connect("connection refused".into()));
        }
        self.shared.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            pending: Vec::new(),
            open: true,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    pending: Vec<Map<String, Value>>,
    open: bool,
}

impl MemoryConnection {
    fn chunk(&mut self, fetch_size: usize) -> ExecutionOutcome {
        let take = fetch_size.min(self.pending.len());
        let data: Vec<_> = self.pending.drain(..take).collect();
        let columns = infer_columns(data.first());
        ExecutionOutcome {
            success: true,
            has_results: !data.is_empty(),
            is_done: self.pending.is_empty(),
            columns,
            data,
            sql_rc: 0,
            sql_state: Some("00000".into()),
            update_count: None,
            execution_time_ms: 1,
        }
    }
}

#[async_trait]
impl Db2Connection for MemoryConnection {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        fetch_size: usize,
    ) -> Result<ExecutionOutcome, DriverError> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        self.shared
            .executed
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));

        if let Some(queued) = self.shared.queued.lock().unwrap().pop_front() {
            return Ok(queued);
        }

        self.pending = self.shared.default_rows.clone();
        Ok(self.chunk(fetch_size))
    }

    async fn fetch_more(&mut self, fetch_size: usize) -> Result<ExecutionOutcome, DriverError> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        Ok(self.chunk(fetch_size))
    }

    async fn ping(&mut self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

fn infer_columns(row: Option<&Map<String, Value>>) -> Vec<ColumnMeta> {
    let Some(row) = row else {
        return Vec::new();
    };
    row.iter()
        .map(|(name, value)| ColumnMeta {
            name: name.clone(),
            type_name: match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => "INTEGER".to_string(),
                Value::Number(_) => "DOUBLE".to_string(),
                Value::Bool(_) => "SMALLINT".to_string(),
                _ => "VARCHAR".to_string(),
            },
            label: None,
        })
        .collect()
}
