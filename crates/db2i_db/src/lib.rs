//! Connection pooling for Db2 for i.
//!
//! The wire-level driver is an external collaborator behind the
//! [`driver::Db2Driver`] trait; this crate owns admission, lazy
//! initialization, health checks, and the split between the
//! environment-credentials pool and per-token authenticated pools.

pub mod auth_pool;
pub mod driver;
pub mod env_pool;
pub mod pool;
pub mod testing;

pub use auth_pool::{AuthPoolManager, PoolStat, SessionValidator};
pub use driver::{ColumnMeta, Db2Connection, Db2Driver, DriverError, ExecutionOutcome};
pub use env_pool::EnvironmentPool;
pub use pool::{ConnectionPool, PoolConfig};
