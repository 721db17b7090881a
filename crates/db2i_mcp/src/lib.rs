//! MCP server core for Db2 for i.
//!
//! JSON-RPC protocol types, the request dispatcher, the tool runtime
//! with its registry and builtins, toolset discovery resources, the
//! rate limiter, and both transports (stateless HTTP, persistent
//! stdio).

pub mod http;
pub mod protocol;
pub mod rate_limit;
pub mod resources;
pub mod server;
pub mod state;
pub mod stdio;
pub mod tools;

pub use server::McpServer;
pub use state::{AppState, QueryRouter};
