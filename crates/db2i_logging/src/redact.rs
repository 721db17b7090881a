//! Secret redaction for structured log payloads.
//!
//! A deny-list of key names whose values never reach a log record or an
//! error details object in the clear.

use serde_json::Value;

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "token",
    "access_token",
    "apikey",
    "api_key",
    "authorization",
    "cookie",
    "secret",
    "credential",
    "credentials",
];

const REDACTED: &str = "[REDACTED]";

/// Whether a key name matches the deny-list.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lower.contains(k))
}

/// Return a copy of `value` with every sensitive key's value replaced.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (key, val) in obj {
                if is_sensitive_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_value(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}
