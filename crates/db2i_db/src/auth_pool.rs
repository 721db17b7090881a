//! Per-token authenticated pool manager.
//!
//! Pools are keyed by opaque bearer token. Every query validates the
//! token first; the session reaper calls [`AuthPoolManager::cleanup_expired_pools`]
//! to close pools whose tokens no longer validate.

use crate::driver::{Db2Driver, ExecutionOutcome};
use crate::pool::{ConnectionPool, PoolConfig};
use db2i_protocol::defaults::{MAX_POOL_MAX_SIZE, MAX_POOL_STARTING_SIZE};
use db2i_protocol::{IbmiCredentials, McpError, McpResult, PoolSizing, RequestContext};
use db2i_sql::guard::SecurityPolicy;
use db2i_sql::SqlValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Token validation seam; implemented by the token manager.
pub trait SessionValidator: Send + Sync {
    /// Err when the token is unknown, expired, or revoked.
    fn validate(&self, token: &str) -> McpResult<()>;
}

/// Diagnostic view of one live pool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStat {
    pub token_prefix: String,
    pub user: String,
    pub host: String,
    pub starting_size: u32,
    pub max_size: u32,
}

pub struct AuthPoolManager {
    driver: Arc<dyn Db2Driver>,
    validator: Arc<dyn SessionValidator>,
    pools: RwLock<HashMap<String, Arc<ConnectionPool>>>,
    /// Credentials kept aside for stat reporting and diagnostics.
    credentials: RwLock<HashMap<String, IbmiCredentials>>,
}

impl AuthPoolManager {
    pub fn new(driver: Arc<dyn Db2Driver>, validator: Arc<dyn SessionValidator>) -> Self {
        Self {
            driver,
            validator,
            pools: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Register a pool for `token`. Size bounds are hard ceilings.
    pub async fn create_pool(
        &self,
        token: &str,
        credentials: IbmiCredentials,
        sizing: PoolSizing,
    ) -> McpResult<()> {
        if sizing.starting_size == 0 || sizing.max_size == 0 {
            return Err(McpError::invalid_request("Pool sizes must be positive"));
        }
        if sizing.starting_size > MAX_POOL_STARTING_SIZE {
            return Err(McpError::invalid_request(format!(
                "Pool starting size {} exceeds maximum {}",
                sizing.starting_size, MAX_POOL_STARTING_SIZE
            )));
        }
        if sizing.max_size > MAX_POOL_MAX_SIZE {
            return Err(McpError::invalid_request(format!(
                "Pool max size {} exceeds maximum {}",
                sizing.max_size, MAX_POOL_MAX_SIZE
            )));
        }
        if sizing.starting_size > sizing.max_size {
            return Err(McpError::invalid_request(format!(
                "Pool starting size {} exceeds max size {}",
                sizing.starting_size, sizing.max_size
            )));
        }

        let pool = Arc::new(ConnectionPool::new(
            Arc::clone(&self.driver),
            PoolConfig::new(credentials.clone(), sizing),
        ));

        self.pools.write().await.insert(token.to_string(), pool);
        self.credentials
            .write()
            .await
            .insert(token.to_string(), credentials.clone());

        info!(
            token = %anonymize_token(token),
            user = %credentials.user,
            host = %credentials.host,
            "authenticated pool created"
        );
        Ok(())
    }

    pub async fn execute_query(
        &self,
        token: &str,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        self.validator.validate(token)?;
        let pool = self.pool_for(token).await?;
        self.log_dispatch(token, &pool, ctx);
        pool.execute_query(sql, params, ctx, policy, fetch_size).await
    }

    pub async fn execute_query_with_pagination(
        &self,
        token: &str,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
    ) -> McpResult<ExecutionOutcome> {
        self.validator.validate(token)?;
        let pool = self.pool_for(token).await?;
        self.log_dispatch(token, &pool, ctx);
        pool.execute_query_with_pagination(sql, params, ctx, policy, fetch_size)
            .await
    }

    /// Close the pool owned by `token` and drop its credential mapping.
    pub async fn remove_pool(&self, token: &str) {
        let pool = self.pools.write().await.remove(token);
        self.credentials.write().await.remove(token);
        if let Some(pool) = pool {
            pool.close().await;
            info!(token = %anonymize_token(token), "authenticated pool removed");
        }
    }

    /// Reap every pool whose token no longer validates.
    pub async fn cleanup_expired_pools(&self) -> usize {
        let tokens: Vec<String> = self.pools.read().await.keys().cloned().collect();
        let mut removed = 0;
        for token in tokens {
            if self.validator.validate(&token).is_err() {
                self.remove_pool(&token).await;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "expired pools reaped");
        }
        removed
    }

    /// Close all pools (graceful shutdown).
    pub async fn close_all(&self) {
        let tokens: Vec<String> = self.pools.read().await.keys().cloned().collect();
        for token in tokens {
            self.remove_pool(&token).await;
        }
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn stats(&self) -> Vec<PoolStat> {
        let pools = self.pools.read().await;
        let credentials = self.credentials.read().await;
        pools
            .iter()
            .filter_map(|(token, pool)| {
                credentials.get(token).map(|creds| PoolStat {
                    token_prefix: anonymize_token(token),
                    user: creds.user.clone(),
                    host: creds.host.clone(),
                    starting_size: pool.config().sizing.starting_size,
                    max_size: pool.config().sizing.max_size,
                })
            })
            .collect()
    }

    async fn pool_for(&self, token: &str) -> McpResult<Arc<ConnectionPool>> {
        self.pools
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| McpError::unauthorized("No pool exists for this token"))
    }

    fn log_dispatch(&self, token: &str, pool: &ConnectionPool, ctx: &RequestContext) {
        debug!(
            token = %anonymize_token(token),
            user = %pool.config().credentials.user,
            host = %pool.config().credentials.host,
            request_id = %ctx.request_id,
            "dispatching on authenticated pool"
        );
    }
}

/// First characters of a token followed by an ellipsis; never the whole
/// value.
pub fn anonymize_token(token: &str) -> String {
    let prefix_len = db2i_protocol::defaults::TOKEN_LOG_PREFIX_LEN;
    let prefix: String = token.chars().take(prefix_len).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDriver;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct FakeValidator {
        valid: Mutex<HashSet<String>>,
    }

    impl FakeValidator {
        fn new(tokens: &[&str]) -> Self {
            Self {
                valid: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            }
        }

        fn revoke(&self, token: &str) {
            self.valid.lock().unwrap().remove(token);
        }
    }

    impl SessionValidator for FakeValidator {
        fn validate(&self, token: &str) -> McpResult<()> {
            if self.valid.lock().unwrap().contains(token) {
                Ok(())
            } else {
                Err(McpError::unauthorized("Invalid or expired token"))
            }
        }
    }

    fn credentials(user: &str) -> IbmiCredentials {
        IbmiCredentials {
            host: "ibmi.example.com".into(),
            port: 8076,
            user: user.into(),
            password: "secret".into(),
            ignore_unauthorized: false,
        }
    }

    fn manager(validator: Arc<FakeValidator>) -> AuthPoolManager {
        AuthPoolManager::new(Arc::new(MemoryDriver::new()), validator)
    }

    #[tokio::test]
    async fn test_create_validates_bounds() {
        let mgr = manager(Arc::new(FakeValidator::new(&["tok"])));
        let err = mgr
            .create_pool("tok", credentials("U"), PoolSizing { starting_size: 60, max_size: 80 })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidRequest { .. }));

        let err = mgr
            .create_pool("tok", credentials("U"), PoolSizing { starting_size: 10, max_size: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidRequest { .. }));

        // poolstart == poolmax is accepted.
        mgr.create_pool("tok", credentials("U"), PoolSizing { starting_size: 5, max_size: 5 })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_execute_requires_valid_token() {
        let validator = Arc::new(FakeValidator::new(&["good"]));
        let mgr = manager(Arc::clone(&validator));
        mgr.create_pool("good", credentials("U"), PoolSizing::default())
            .await
            .unwrap();

        let ctx = RequestContext::new();
        assert!(mgr
            .execute_query("good", "SELECT 1 FROM sysibm.sysdummy1", &[], &ctx, None, 300)
            .await
            .is_ok());

        validator.revoke("good");
        let err = mgr
            .execute_query("good", "SELECT 1 FROM sysibm.sysdummy1", &[], &ctx, None, 300)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_reaps_invalid_tokens() {
        let validator = Arc::new(FakeValidator::new(&["a", "b"]));
        let mgr = manager(Arc::clone(&validator));
        mgr.create_pool("a", credentials("UA"), PoolSizing::default())
            .await
            .unwrap();
        mgr.create_pool("b", credentials("UB"), PoolSizing::default())
            .await
            .unwrap();
        assert_eq!(mgr.pool_count().await, 2);

        validator.revoke("a");
        let removed = mgr.cleanup_expired_pools().await;
        assert_eq!(removed, 1);
        assert_eq!(mgr.pool_count().await, 1);
    }

    #[tokio::test]
    async fn test_stats_report_anonymized_tokens() {
        let mgr = manager(Arc::new(FakeValidator::new(&["supersecrettoken123"])));
        mgr.create_pool(
            "supersecrettoken123",
            credentials("STATUSER"),
            PoolSizing { starting_size: 2, max_size: 10 },
        )
        .await
        .unwrap();
        let stats = mgr.stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].token_prefix, "supersecre…");
        assert_eq!(stats[0].user, "STATUSER");
        assert_eq!(stats[0].max_size, 10);
    }
}
