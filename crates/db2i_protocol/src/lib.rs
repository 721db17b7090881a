//! Shared types for the Db2 for i MCP server.
//!
//! This crate holds the vocabulary every other crate speaks: the error
//! taxonomy with its JSON-RPC codes, the per-request correlation context,
//! credentials and pool sizing, and the environment-derived configuration.

pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod types;

pub use config::{AuthConfig, Db2Config, Environment, HttpConfig, RateLimitConfig, ServerConfig, TransportKind};
pub use context::RequestContext;
pub use error::{McpError, McpResult};
pub use types::{IbmiCredentials, PoolSizing};
