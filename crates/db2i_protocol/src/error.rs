//! Error taxonomy shared across the server.
//!
//! Every error kind maps to a JSON-RPC compatible integer code so the MCP
//! layer can surface it unchanged. Kinds in the -32000..-32099 range are
//! server-defined per the JSON-RPC 2.0 spec.

use serde_json::Value;
use thiserror::Error;

/// Result alias used on every fallible boundary that crosses crates.
pub type McpResult<T> = Result<T, McpError>;

/// Server-wide error type.
///
/// `details` carries a structured object that is serialized into the
/// JSON-RPC error `data` field; secrets must be redacted before they land
/// here (see `db2i_logging::redact`).
#[derive(Debug, Clone, Error)]
pub enum McpError {
    /// Malformed body, missing field, envelope invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String, details: Option<Value> },

    /// Parameter validation or SQL policy violation.
    #[error("Validation error: {message}")]
    Validation { message: String, details: Option<Value> },

    /// Missing or malformed YAML/config.
    #[error("Configuration error: {message}")]
    Configuration { message: String, details: Option<Value> },

    /// Pool or server startup failure.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String, details: Option<Value> },

    /// Bearer token invalid or expired.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String, details: Option<Value> },

    /// Feature disabled or unknown tool/method.
    #[error("Method not found: {message}")]
    MethodNotFound { message: String, details: Option<Value> },

    /// Request admission rejected by the rate limiter.
    #[error("Rate limited: {message}")]
    RateLimited { message: String, details: Option<Value> },

    /// Driver error during execute.
    #[error("Database error: {message}")]
    Database { message: String, details: Option<Value> },

    /// Unexpected failure with the original preserved in details.
    #[error("Internal error: {message}")]
    Internal { message: String, details: Option<Value> },
}

impl McpError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into(), details: None }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), details: None }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), details: None }
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::InitializationFailed { message: message.into(), details: None }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized { message: message.into(), details: None }
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::MethodNotFound { message: message.into(), details: None }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited { message: message.into(), details: None }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into(), details: None }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), details: None }
    }

    /// Attach a structured details object.
    pub fn with_details(mut self, value: Value) -> Self {
        *self.details_mut() = Some(value);
        self
    }

    fn details_mut(&mut self) -> &mut Option<Value> {
        match self {
            Self::InvalidRequest { details, .. }
            | Self::Validation { details, .. }
            | Self::Configuration { details, .. }
            | Self::InitializationFailed { details, .. }
            | Self::Unauthorized { details, .. }
            | Self::MethodNotFound { details, .. }
            | Self::RateLimited { details, .. }
            | Self::Database { details, .. }
            | Self::Internal { details, .. } => details,
        }
    }

    /// The JSON-RPC error code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidRequest { .. } => -32600,
            Self::MethodNotFound { .. } => -32601,
            Self::Validation { .. } => -32602,
            Self::Internal { .. } => -32603,
            Self::RateLimited { .. } => -32000,
            Self::Unauthorized { .. } => -32001,
            Self::Configuration { .. } => -32002,
            Self::InitializationFailed { .. } => -32003,
            Self::Database { .. } => -32010,
        }
    }

    /// The human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest { message, .. }
            | Self::Validation { message, .. }
            | Self::Configuration { message, .. }
            | Self::InitializationFailed { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::MethodNotFound { message, .. }
            | Self::RateLimited { message, .. }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    /// The structured details object, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::InvalidRequest { details, .. }
            | Self::Validation { details, .. }
            | Self::Configuration { details, .. }
            | Self::InitializationFailed { details, .. }
            | Self::Unauthorized { details, .. }
            | Self::MethodNotFound { details, .. }
            | Self::RateLimited { details, .. }
            | Self::Database { details, .. }
            | Self::Internal { details, .. } => details.as_ref(),
        }
    }

    /// Serialize to the `{code, message, details}` object used in tool
    /// responses and JSON-RPC error bodies.
    pub fn to_structured(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("code".into(), Value::from(self.code()));
        obj.insert("message".into(), Value::from(self.message().to_string()));
        if let Some(details) = self.details() {
            obj.insert("details".into(), details.clone());
        }
        Value::Object(obj)
    }
}
