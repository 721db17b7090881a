//! Environment-credentials pool.
//!
//! A process-wide typed handle over one [`ConnectionPool`] fed by the
//! `DB2i_*` environment configuration. Lazily initialized on first
//! query; construction with no credentials defers the failure until a
//! query actually needs the pool.

use crate::driver::{Db2Driver, ExecutionOutcome};
use crate::pool::{ConnectionPool, PoolConfig};
use db2i_protocol::{Db2Config, McpError, McpResult, PoolSizing, RequestContext};
use db2i_sql::guard::SecurityPolicy;
use db2i_sql::SqlValue;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct EnvironmentPool {
    driver: Arc<dyn Db2Driver>,
    config: Option<Db2Config>,
    sizing: PoolSizing,
    pool: OnceCell<Arc<ConnectionPool>>,
}

impl EnvironmentPool {
    pub fn new(driver: Arc<dyn Db2Driver>, config: Option<Db2Config>) -> Self {
        Self {
            driver,
            config,
            sizing: PoolSizing::default(),
            pool: OnceCell::new(),
        }
    }

    pub fn with_sizing(mut self, sizing: PoolSizing) -> Self {
        self.sizing = sizing;
        self
    }

    /// Whether environment credentials were configured at all.
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    async fn pool(&self) -> McpResult<&Arc<ConnectionPool>> {
        let config = self.config.as_ref().ok_or_else(|| {
            McpError::configuration(
                "Environment pool credentials missing: set DB2i_HOST, DB2i_USER, DB2i_PASS",
            )
        })?;
        self.pool
            .get_or_try_init(|| async {
                let pool = Arc::new(ConnectionPool::new(
                    Arc::clone(&self.driver),
                    PoolConfig::new(config.credentials.clone(), self.sizing),
                ));
                pool.ensure_initialized().await?;
                Ok::<_, McpError>(pool)
            })
            .await
    }

    pub async fn execute_query(
        &self,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        self.pool()
            .await?
            .execute_query(sql, params, ctx, policy, fetch_size)
            .await
    }

    pub async fn execute_query_with_pagination(
        &self,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        self.pool()
            .await?
            .execute_query_with_pagination(sql, params, ctx, policy, fetch_size)
            .await
    }

    /// Terminate the pool and release its connections.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDriver;
    use db2i_protocol::IbmiCredentials;

    fn config() -> Db2Config {
        Db2Config {
            credentials: IbmiCredentials {
                host: "ibmi.example.com".into(),
                port: 8076,
                user: "ENVUSER".into(),
                password: "secret".into(),
                ignore_unauthorized: false,
            },
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_is_configuration_error() {
        let pool = EnvironmentPool::new(Arc::new(MemoryDriver::new()), None);
        let ctx = RequestContext::new();
        let err = pool
            .execute_query("SELECT 1 FROM sysibm.sysdummy1", &[], &ctx, None, 300)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_lazy_init_on_first_query() {
        let driver = Arc::new(MemoryDriver::new());
        let pool = EnvironmentPool::new(
            Arc::clone(&driver) as Arc<dyn Db2Driver>,
            Some(config()),
        );
        assert_eq!(driver.connect_count(), 0);
        let ctx = RequestContext::new();
        pool.execute_query("SELECT 1 FROM sysibm.sysdummy1", &[], &ctx, None, 300)
            .await
            .unwrap();
        assert!(driver.connect_count() > 0);
    }
}
