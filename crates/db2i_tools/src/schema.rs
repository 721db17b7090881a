//! External YAML representation of the tools configuration.
//!
//! These structs match the YAML surface exactly; the factory converts
//! them into validated runtime objects.

use db2i_protocol::defaults::{DEFAULT_DB2I_PORT, DEFAULT_MAX_QUERY_LENGTH};
use db2i_protocol::IbmiCredentials;
use db2i_sql::guard::SecurityPolicy;
use db2i_sql::ParameterDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level tools configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsFile {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
    #[serde(default)]
    pub toolsets: BTreeMap<String, ToolsetConfig>,
}

/// A named Db2 for i endpoint. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub ignore_unauthorized: bool,
}

fn default_port() -> u16 {
    DEFAULT_DB2I_PORT
}

impl SourceConfig {
    pub fn to_credentials(&self) -> IbmiCredentials {
        IbmiCredentials {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            ignore_unauthorized: self.ignore_unauthorized,
        }
    }
}

/// A declared SQL tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub source: String,
    #[serde(default)]
    pub description: Option<String>,
    pub statement: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    pub security: Option<SecuritySection>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ToolConfig {
    /// Effective security policy (defaults applied).
    pub fn policy(&self) -> SecurityPolicy {
        self.security
            .as_ref()
            .map(SecuritySection::to_policy)
            .unwrap_or_default()
    }
}

/// Per-tool security block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySection {
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default)]
    pub forbidden_keywords: Vec<String>,
}

fn default_read_only() -> bool {
    true
}

fn default_max_query_length() -> usize {
    DEFAULT_MAX_QUERY_LENGTH
}

impl SecuritySection {
    pub fn to_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            read_only: self.read_only,
            max_query_length: self.max_query_length,
            forbidden_keywords: self.forbidden_keywords.clone(),
        }
    }
}

/// A named bundle of tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsetConfig {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}
