//! Credentials and pool sizing types.

use crate::defaults::{DEFAULT_POOL_MAX_SIZE, DEFAULT_POOL_STARTING_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection credentials for a Db2 for i endpoint.
///
/// `Debug` redacts the password so the struct can appear in log records.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbmiCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Disable TLS certificate verification (dev only).
    #[serde(default)]
    pub ignore_unauthorized: bool,
}

impl fmt::Debug for IbmiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IbmiCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("ignore_unauthorized", &self.ignore_unauthorized)
            .finish()
    }
}

/// Pool sizing policy attached to an auth session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizing {
    pub starting_size: u32,
    pub max_size: u32,
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            starting_size: DEFAULT_POOL_STARTING_SIZE,
            max_size: DEFAULT_POOL_MAX_SIZE,
        }
    }
}
