//! `${VAR}` interpolation against an environment snapshot.
//!
//! Runs over the raw YAML text before deserialization. Unresolved
//! variables pass through literally with a debug log.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// Replace `${VAR}` occurrences in `raw` with values from `env`.
pub fn interpolate_env(raw: &str, env: &HashMap<String, String>) -> String {
    var_pattern()
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match env.get(name) {
                Some(value) => value.clone(),
                None => {
                    debug!(var = name, "unresolved ${{VAR}} left literal");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Snapshot of the process environment taken once at startup.
pub fn env_snapshot() -> HashMap<String, String> {
    std::env::vars().collect()
}
