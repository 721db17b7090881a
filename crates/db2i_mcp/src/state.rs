//! Shared server state and query routing.
//!
//! `AppState` is built once at startup and shared by every transport.
//! `QueryRouter` implements the auth routing rule: a bearer token on the
//! request context routes to the per-token pools, otherwise the
//! environment pool serves the call.

use crate::rate_limit::RateLimiter;
use crate::tools::ToolRegistry;
use db2i_auth::{KeyRing, TokenManager};
use db2i_db::auth_pool::AuthPoolManager;
use db2i_db::driver::{Db2Driver, ExecutionOutcome};
use db2i_db::EnvironmentPool;
use db2i_protocol::{Db2Config, McpResult, RequestContext, ServerConfig};
use db2i_sql::guard::SecurityPolicy;
use db2i_sql::SqlValue;
use db2i_tools::{ParsingResult, ToolsetManager};
use std::sync::Arc;
use tracing::info;

/// Routes a query to the authenticated or environment pool.
pub struct QueryRouter {
    env_pool: EnvironmentPool,
    auth_pools: Arc<AuthPoolManager>,
}

impl QueryRouter {
    pub fn new(env_pool: EnvironmentPool, auth_pools: Arc<AuthPoolManager>) -> Self {
        Self { env_pool, auth_pools }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        token: Option<&str>,
        sql: &str,
        params: &[SqlValue],
        ctx: &RequestContext,
        policy: Option<&SecurityPolicy>,
        fetch_size: usize,
        paginate: bool,
    ) -> McpResult<ExecutionOutcome> {
        match token {
            Some(token) => {
                if paginate {
                    self.auth_pools
                        .execute_query_with_pagination(token, sql, params, ctx, policy, fetch_size)
                        .await
                } else {
                    self.auth_pools
                        .execute_query(token, sql, params, ctx, policy, fetch_size)
                        .await
                }
            }
            None => {
                if paginate {
                    self.env_pool
                        .execute_query_with_pagination(sql, params, ctx, policy, fetch_size)
                        .await
                } else {
                    self.env_pool
                        .execute_query(sql, params, ctx, policy, fetch_size)
                        .await
                }
            }
        }
    }

    /// Close the environment pool and every authenticated pool.
    pub async fn close_all(&self) {
        self.env_pool.close().await;
        self.auth_pools.close_all().await;
    }
}

/// Process-wide server state shared across transports.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: ToolRegistry,
    pub toolsets: ToolsetManager,
    pub router: Arc<QueryRouter>,
    pub tokens: Arc<TokenManager>,
    pub auth_pools: Arc<AuthPoolManager>,
    /// Present only when the auth endpoint is enabled.
    pub keyring: Option<KeyRing>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire the full server from configuration and a parsed tools file.
    pub fn build(
        config: ServerConfig,
        driver: Arc<dyn Db2Driver>,
        parsing: ParsingResult,
        toolset_filter: Option<Vec<String>>,
    ) -> McpResult<Arc<Self>> {
        let tokens = Arc::new(TokenManager::new());
        let validator: Arc<dyn db2i_db::auth_pool::SessionValidator> =
            Arc::clone(&tokens) as Arc<dyn db2i_db::auth_pool::SessionValidator>;
        let auth_pools = Arc::new(AuthPoolManager::new(Arc::clone(&driver), validator));

        // Environment pool credentials come from DB2i_* variables; when
        // absent, the first declared source serves as the default
        // endpoint (sources are env-interpolated already).
        let env_config = config.db2.clone().or_else(|| {
            parsing.config.sources.values().next().map(|source| Db2Config {
                credentials: source.to_credentials(),
            })
        });
        let env_pool = EnvironmentPool::new(Arc::clone(&driver), env_config);

        let mut global_tools = vec![crate::tools::DESCRIBE_OBJECT_NAME.to_string()];
        if config.enable_execute_sql {
            global_tools.push(crate::tools::EXECUTE_SQL_NAME.to_string());
        }
        let toolsets = ToolsetManager::new(&parsing.config, global_tools);

        let registry = ToolRegistry::build(
            &parsing,
            &toolsets,
            toolset_filter.as_deref(),
            config.enable_execute_sql,
            config.execute_sql_parse_check,
        );

        let rate_limiter = RateLimiter::new(
            config.rate_limit.clone(),
            config.environment.is_development(),
        );

        // Key material is only needed when the auth endpoint is on.
        let keyring = if config.auth.enabled {
            Some(KeyRing::generate()?)
        } else {
            None
        };

        info!(
            transport = config.transport.as_str(),
            tools = registry.len(),
            auth_enabled = config.auth.enabled,
            "server state built"
        );

        Ok(Arc::new(Self {
            config,
            registry,
            toolsets,
            router: Arc::new(QueryRouter::new(env_pool, Arc::clone(&auth_pools))),
            tokens,
            auth_pools,
            keyring,
            rate_limiter,
        }))
    }

    /// Graceful-shutdown teardown: every pool closed.
    pub async fn shutdown(&self) {
        self.router.close_all().await;
    }
}
