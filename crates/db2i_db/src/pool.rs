//! Base connection pool.
//!
//! Initialization is lazy, idempotent, and serialized: concurrent first
//! callers await a single init future. Admission is bounded by a
//! semaphore sized to `max_size`; idle connections beyond
//! `starting_size` are reclaimed on check-in.

use crate::driver::{Db2Connection, Db2Driver, DriverError, ExecutionOutcome};
use db2i_protocol::defaults::POOL_INIT_TIMEOUT;
use db2i_protocol::{IbmiCredentials, McpError, McpResult, PoolSizing, RequestContext};
use db2i_sql::guard::{self, SecurityPolicy};
use db2i_sql::SqlValue;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub credentials: IbmiCredentials,
    pub sizing: PoolSizing,
    pub init_timeout: Duration,
}

impl PoolConfig {
    pub fn new(credentials: IbmiCredentials, sizing: PoolSizing) -> Self {
        Self {
            credentials,
            sizing,
            init_timeout: POOL_INIT_TIMEOUT,
        }
    }
}

pub struct ConnectionPool {
    driver: Arc<dyn Db2Driver>,
    config: PoolConfig,
    init: OnceCell<()>,
    idle: Mutex<Vec<Box<dyn Db2Connection>>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(driver: Arc<dyn Db2Driver>, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.sizing.max_size as usize));
        Self {
            driver,
            config,
            init: OnceCell::new(),
            idle: Mutex::new(Vec::new()),
            permits,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// Idempotent, serialized warm-up of `starting_size` connections.
    pub async fn ensure_initialized(&self) -> McpResult<()> {
        let init = tokio::time::timeout(
            self.config.init_timeout,
            self.init.get_or_try_init(|| async {
                let mut warm = Vec::with_capacity(self.config.sizing.starting_size as usize);
                for _ in 0..self.config.sizing.starting_size {
                    let conn = self.driver.connect(&self.config.credentials).await?;
                    warm.push(conn);
                }
                debug!(
                    host = %self.config.credentials.host,
                    user = %self.config.credentials.user,
                    connections = warm.len(),
                    "pool initialized"
                );
                self.idle.lock().await.extend(warm);
                Ok::<(), DriverError>(())
            }),
        )
        .await;

        match init {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(McpError::initialization(format!("Pool initialization failed: {e}"))),
            Err(_) => Err(McpError::initialization(format!(
                "Pool initialization timed out after {:?}",
                self.config.init_timeout
            ))),
        }
    }

    /// Execute one statement.
    ///
    /// When `policy` is supplied, the security validator runs on `sql`
    /// before the driver sees it; both the environment-credentials path
    /// and the per-token path go through this same call site.
    pub async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        if let Some(policy) = policy {
            guard::validate(sql, policy)?;
        }
        self.ensure_initialized().await?;

        let _permit = self.acquire_permit(ctx).await?;
        let mut conn = self.checkout().await?;
        let outcome = self
            .run_with_deadline(ctx, conn.execute(sql, params, fetch_size))
            .await;
        self.settle(conn, &outcome, sql, ctx).await
    }

    /// Execute and drain the full result set with repeated fetches.
    pub async fn execute_query_with_pagination(
        &self,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        if let Some(policy) = policy {
            guard::validate(sql, policy)?;
        }
        self.ensure_initialized().await?;

        let _permit = self.acquire_permit(ctx).await?;
        let mut conn = self.checkout().await?;

        let mut combined = match self
            .run_with_deadline(ctx, conn.execute(sql, params, fetch_size))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard(conn).await;
                return Err(driver_error(e, sql, ctx));
            }
        };

        while !combined.is_done {
            match self
                .run_with_deadline(ctx, conn.fetch_more(fetch_size))
                .await
            {
                Ok(next) => combined.absorb(next),
                Err(e) => {
                    self.discard(conn).await;
                    return Err(driver_error(e, sql, ctx));
                }
            }
        }

        self.check_in(conn).await;
        Ok(combined)
    }

    /// Close every idle connection and refuse further work.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut idle = self.idle.lock().await;
        for mut conn in idle.drain(..) {
            conn.close().await;
        }
    }

    async fn acquire_permit(&self, ctx: &RequestContext) -> McpResult<tokio::sync::OwnedSemaphorePermit> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::database("Pool is closed"));
        }
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match ctx.remaining() {
            Some(remaining) => tokio::time::timeout(remaining, acquire)
                .await
                .map_err(|_| cancelled_error(ctx))?,
            None => acquire.await,
        };
        permit.map_err(|_| McpError::database("Pool is closed"))
    }

    async fn checkout(&self) -> McpResult<Box<dyn Db2Connection>> {
        // Health-check idle connections; fall through to a fresh connect.
        loop {
            let candidate = self.idle.lock().await.pop();
            match candidate {
                Some(mut conn) => {
                    if conn.ping().await {
                        return Ok(conn);
                    }
                    conn.close().await;
                    debug!("dropped dead idle connection");
                }
                None => break,
            }
        }
        self.driver
            .connect(&self.config.credentials)
            .await
            .map_err(|e| McpError::database(format!("Connection failed: {e}")))
    }

    async fn run_with_deadline<F>(
        &self,
        ctx: &RequestContext,
        fut: F,
    ) -> Result<ExecutionOutcome, RunError>
    where
        F: std::future::Future<Output = Result<ExecutionOutcome, DriverError>>,
    {
        match ctx.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, fut).await {
                Ok(result) => result.map_err(RunError::Driver),
                // The driver may finish server-side; no result is returned.
                Err(_) => Err(RunError::DeadlineExceeded),
            },
            None => fut.await.map_err(RunError::Driver),
        }
    }

    async fn settle(
        &self,
        conn: Box<dyn Db2Connection>,
        outcome: &Result<ExecutionOutcome, RunError>,
        sql: &str,
        ctx: &RequestContext,
    ) -> McpResult<ExecutionOutcome> {
        match outcome {
            Ok(result) => {
                self.check_in(conn).await;
                Ok(result.clone())
            }
            Err(e) => {
                self.discard(conn).await;
                Err(driver_error(e.clone(), sql, ctx))
            }
        }
    }

    async fn check_in(&self, conn: Box<dyn Db2Connection>) {
        if self.closed.load(Ordering::SeqCst) {
            let mut conn = conn;
            conn.close().await;
            return;
        }
        let mut idle = self.idle.lock().await;
        idle.push(conn);
        // Reclaim idle connections beyond the warm floor.
        while idle.len() > self.config.sizing.starting_size.max(1) as usize {
            if let Some(mut extra) = idle.pop() {
                extra.close().await;
            }
        }
    }

    async fn discard(&self, mut conn: Box<dyn Db2Connection>) {
        conn.close().await;
        warn!("discarded connection after error");
    }
}

#[derive(Debug, Clone)]
enum RunError {
    Driver(DriverError),
    DeadlineExceeded,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(e) => write!(f, "{e}"),
            Self::DeadlineExceeded => write!(f, "request deadline exceeded"),
        }
    }
}

fn cancelled_error(ctx: &RequestContext) -> McpError {
    McpError::internal("Request deadline exceeded").with_details(json!({
        "cancelled": true,
        "requestId": ctx.request_id,
    }))
}

fn driver_error(error: RunError, sql: &str, ctx: &RequestContext) -> McpError {
    match error {
        RunError::DeadlineExceeded => cancelled_error(ctx),
        RunError::Driver(e) => McpError::database(format!("Query execution failed: {e}"))
            .with_details(json!({
                "sql": sql,
                "originalError": e.to_string(),
            })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDriver;
    use db2i_protocol::PoolSizing;
    use serde_json::Map;

    fn credentials() -> IbmiCredentials {
        IbmiCredentials {
            host: "ibmi.example.com".into(),
            port: 8076,
            user: "TESTUSER".into(),
            password: "secret".into(),
            ignore_unauthorized: false,
        }
    }

    fn row(name: &str) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("name".into(), serde_json::Value::String(name.into()));
        m
    }

    #[tokio::test]
    async fn test_lazy_init_is_single() {
        let driver = Arc::new(MemoryDriver::new());
        let pool = Arc::new(ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing { starting_size: 3, max_size: 5 }),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.ensure_initialized().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // One init attempt: exactly starting_size connects.
        assert_eq!(driver.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_execute_query_returns_rows() {
        let driver = Arc::new(MemoryDriver::new().with_default_rows(vec![row("A"), row("B")]));
        let pool = ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing::default()),
        );
        let ctx = RequestContext::new();
        let outcome = pool
            .execute_query("SELECT name FROM t", &[], &ctx, None, 300)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.data.len(), 2);
        assert_eq!(driver.executed()[0].0, "SELECT name FROM t");
    }

    #[tokio::test]
    async fn test_policy_enforced_before_driver() {
        let driver = Arc::new(MemoryDriver::new());
        let pool = ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing::default()),
        );
        let ctx = RequestContext::new();
        let err = pool
            .execute_query(
                "INSERT INTO t(x) VALUES(1)",
                &[],
                &ctx,
                Some(&SecurityPolicy::default()),
                300,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Validation { .. }));
        assert!(driver.executed().is_empty(), "driver must not see rejected SQL");
    }

    #[tokio::test]
    async fn test_pagination_concatenates() {
        let rows: Vec<_> = (0..7).map(|i| row(&format!("r{i}"))).collect();
        let driver = Arc::new(MemoryDriver::new().with_default_rows(rows));
        let pool = ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing::default()),
        );
        let ctx = RequestContext::new();
        let outcome = pool
            .execute_query_with_pagination("SELECT * FROM t", &[], &ctx, None, 3)
            .await
            .unwrap();
        assert!(outcome.is_done);
        assert_eq!(outcome.data.len(), 7);
    }

    #[tokio::test]
    async fn test_init_failure_is_initialization_error() {
        let driver = Arc::new(MemoryDriver::new().failing_connects());
        let pool = ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing::default()),
        );
        let err = pool.ensure_initialized().await.unwrap_err();
        assert!(matches!(err, McpError::InitializationFailed { .. }));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let driver = Arc::new(MemoryDriver::new());
        let pool = ConnectionPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            PoolConfig::new(credentials(), PoolSizing::default()),
        );
        pool.ensure_initialized().await.unwrap();
        pool.close().await;
        let ctx = RequestContext::new();
        let err = pool
            .execute_query("SELECT 1 FROM sysibm.sysdummy1", &[], &ctx, None, 300)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Database { .. }));
    }
}
