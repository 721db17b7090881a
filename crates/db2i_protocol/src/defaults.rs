//! Canonical default values shared across the server.

use std::time::Duration;

/// Maximum query length accepted by the security validator by default.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;

/// Driver fetch size for ordinary tool queries.
pub const DEFAULT_FETCH_SIZE: usize = 300;
/// Driver fetch size for DDL extraction (describe_object).
pub const DDL_FETCH_SIZE: usize = 500;
/// Driver fetch size for the raw execute_sql tool.
pub const EXECUTE_SQL_FETCH_SIZE: usize = 1000;

/// Hard ceiling on the starting size of an authenticated pool.
pub const MAX_POOL_STARTING_SIZE: u32 = 50;
/// Hard ceiling on the max size of an authenticated pool.
pub const MAX_POOL_MAX_SIZE: u32 = 100;
/// Starting size used when the auth request does not specify one.
pub const DEFAULT_POOL_STARTING_SIZE: u32 = 2;
/// Max size used when the auth request does not specify one.
pub const DEFAULT_POOL_MAX_SIZE: u32 = 10;

/// Upper bound on a requested token lifetime, in seconds.
pub const MAX_TOKEN_DURATION_SECS: u64 = 86_400;
/// Token lifetime used when the auth request does not specify one.
pub const DEFAULT_TOKEN_DURATION_SECS: u64 = 3_600;
/// Ceiling on concurrently live auth sessions.
pub const MAX_CONCURRENT_SESSIONS: usize = 100;
/// Interval between reaper sweeps over expired sessions.
pub const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Callers waiting on pool initialization longer than this fail.
pub const POOL_INIT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 3010;
pub const DEFAULT_DB2I_PORT: u16 = 8076;

/// Rows pretty-printed into the human-readable half of a tool response.
pub const TEXT_PREVIEW_ROWS: usize = 50;

/// Drain deadline during graceful shutdown, in seconds.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Characters of a bearer token echoed into logs, followed by an ellipsis.
pub const TOKEN_LOG_PREFIX_LEN: usize = 10;

/// Characters of a rejected query echoed into violation details.
pub const QUERY_PREVIEW_LEN: usize = 100;
