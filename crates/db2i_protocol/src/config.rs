//! Environment-derived server configuration.
//!
//! All recognized variables are read once at startup against a snapshot of
//! the process environment. CLI flags (parsed in the launcher) override the
//! corresponding fields after `ServerConfig::from_env` returns.

use crate::defaults::{
    DEFAULT_DB2I_PORT, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_RATE_LIMIT_MAX_REQUESTS,
    DEFAULT_RATE_LIMIT_WINDOW_MS, DEFAULT_TOKEN_DURATION_SECS,
};
use crate::error::{McpError, McpResult};
use crate::types::IbmiCredentials;
use std::collections::HashMap;
use std::path::PathBuf;

/// Which transport the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

impl TransportKind {
    pub fn parse(value: &str) -> McpResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(McpError::configuration(format!(
                "Unknown transport type: {other} (expected stdio or http)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Deployment environment, used by TLS enforcement and rate-limit bypass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Environment-credentials Db2 endpoint (`DB2i_*` variables).
#[derive(Debug, Clone)]
pub struct Db2Config {
    pub credentials: IbmiCredentials,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_ms: u64,
    /// Bypass the limiter entirely in development.
    pub skip_in_dev: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            skip_in_dev: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Accept the auth endpoint over plain HTTP (development only).
    pub allow_http: bool,
    pub token_expiry_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_http: false,
            token_expiry_seconds: DEFAULT_TOKEN_DURATION_SECS,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub transport: TransportKind,
    pub tools_path: Option<String>,
    pub http: HttpConfig,
    pub db2: Option<Db2Config>,
    pub logs_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub enable_execute_sql: bool,
    /// Run the QSYS2.PARSE_STATEMENT gate inside execute_sql.
    pub execute_sql_parse_check: bool,
    pub environment: Environment,
}

impl ServerConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> McpResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_snapshot(&env)
    }

    /// Build configuration from an explicit snapshot (testable seam).
    pub fn from_snapshot(env: &HashMap<String, String>) -> McpResult<Self> {
        let transport = match env.get("MCP_TRANSPORT_TYPE") {
            Some(raw) => TransportKind::parse(raw)?,
            None => TransportKind::default(),
        };

        let environment = match env.get("ENVIRONMENT").map(String::as_str) {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };

        let http = HttpConfig {
            host: env
                .get("MCP_HTTP_HOST")
                .cloned()
                .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
            port: parse_var(env, "MCP_HTTP_PORT", DEFAULT_HTTP_PORT)?,
        };

        let db2 = match env.get("DB2i_HOST") {
            Some(host) if !host.is_empty() => {
                let user = require_var(env, "DB2i_USER")?;
                let password = require_var(env, "DB2i_PASS")?;
                Some(Db2Config {
                    credentials: IbmiCredentials {
                        host: host.clone(),
                        port: parse_var(env, "DB2i_PORT", DEFAULT_DB2I_PORT)?,
                        user,
                        password,
                        ignore_unauthorized: bool_var(env, "DB2i_IGNORE_UNAUTHORIZED"),
                    },
                })
            }
            _ => None,
        };

        let rate_limit = RateLimitConfig {
            enabled: env
                .get("MCP_RATE_LIMIT_ENABLED")
                .map(|v| is_truthy(v))
                .unwrap_or(true),
            max_requests: parse_var(env, "MCP_RATE_LIMIT_MAX_REQUESTS", DEFAULT_RATE_LIMIT_MAX_REQUESTS)?,
            window_ms: parse_var(env, "MCP_RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_LIMIT_WINDOW_MS)?,
            skip_in_dev: bool_var(env, "MCP_RATE_LIMIT_SKIP_DEV"),
        };

        let auth = AuthConfig {
            enabled: bool_var(env, "IBMI_AUTH_ENABLED"),
            allow_http: bool_var(env, "IBMI_AUTH_ALLOW_HTTP"),
            token_expiry_seconds: parse_var(
                env,
                "IBMI_AUTH_TOKEN_EXPIRY_SECONDS",
                DEFAULT_TOKEN_DURATION_SECS,
            )?,
        };

        Ok(Self {
            transport,
            tools_path: env.get("TOOLS_YAML_PATH").cloned(),
            http,
            db2,
            logs_path: env.get("LOGS_PATH").map(PathBuf::from),
            log_level: env.get("MCP_LOG_LEVEL").cloned(),
            rate_limit,
            auth,
            enable_execute_sql: bool_var(env, "IBMI_ENABLE_EXECUTE_SQL"),
            execute_sql_parse_check: bool_var(env, "IBMI_EXECUTE_SQL_PARSE_CHECK"),
            environment,
        })
    }
}

fn require_var(env: &HashMap<String, String>, name: &str) -> McpResult<String> {
    match env.get(name) {
        Some(v) if !v.is_empty() => Ok(v.clone()),
        _ => Err(McpError::configuration(format!("Missing required environment variable: {name}"))),
    }
}

fn parse_var<T: std::str::FromStr>(
    env: &HashMap<String, String>,
    name: &str,
    default: T,
) -> McpResult<T> {
    match env.get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| McpError::configuration(format!("Invalid value for {name}: {raw}"))),
        None => Ok(default),
    }
}

fn bool_var(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name).map(|v| is_truthy(v)).unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
