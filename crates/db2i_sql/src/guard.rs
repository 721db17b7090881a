//! Layered read-only SQL security validator.
//!
//! Layer order: length, forbidden keywords, read-only structural
//! allowlist, regex coverage for patterns the token walk can miss. The
//! token path is primary; the regex path is a fallback for keyword
//! checks only. When the parser fails under read-only policy the guard
//! fails closed; no regex result can re-open that gate.

use crate::lexer::tokenize;
use crate::statement::{parse, StatementKind};
use crate::token::TokenKind;
use db2i_protocol::defaults::{DEFAULT_MAX_QUERY_LENGTH, QUERY_PREVIEW_LEN};
use db2i_protocol::{McpError, McpResult};
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Per-tool security policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub read_only: bool,
    pub max_query_length: usize,
    pub forbidden_keywords: Vec<String>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            read_only: true,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            forbidden_keywords: Vec::new(),
        }
    }
}

/// Which layer produced the final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatedBy {
    Token,
    RegexFallback,
    /// Runtime `QSYS2.PARSE_STATEMENT` check (execute_sql only).
    ParseStatement,
}

impl ValidatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::RegexFallback => "regex-fallback",
            Self::ParseStatement => "parse_statement",
        }
    }
}

/// Statement verbs that must never appear bare in a read-only query.
const DANGEROUS_OPERATIONS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "DROP", "CREATE", "ALTER", "RENAME",
    "CALL", "EXEC", "EXECUTE", "SET", "DECLARE", "GRANT", "REVOKE", "DENY", "LOAD", "IMPORT",
    "EXPORT", "BULK", "SHUTDOWN", "RESTART", "KILL", "STOP", "START", "BACKUP", "RESTORE",
    "DUMP", "LOCK", "UNLOCK", "COMMIT", "ROLLBACK", "SAVEPOINT", "QCMDEXC",
    "SQL_EXECUTE_IMMEDIATE",
];

/// Function names whose call form is rejected regardless of position.
const DANGEROUS_FUNCTIONS: &[&str] = &[
    "SYSTEM",
    "QCMDEXC",
    "SQL_EXECUTE_IMMEDIATE",
    "SQLCMD",
    "LOAD_EXTENSION",
    "EXEC",
    "EXECUTE_IMMEDIATE",
    "EVAL",
];

/// Catalog schemas whose procedures are known read-only.
const READ_ONLY_CALL_SCHEMAS: &[&str] = &["QSYS2", "SYSTOOLS", "QSYS"];

/// Validate `sql` against `policy`.
///
/// Must run on the post-rewrite SQL, on both the environment-credentials
/// and the per-token execution paths.
pub fn validate(sql: &str, policy: &SecurityPolicy) -> McpResult<ValidatedBy> {
    if sql.len() > policy.max_query_length {
        return Err(violation_error(
            vec![format!(
                "Query length {} exceeds maximum {}",
                sql.len(),
                policy.max_query_length
            )],
            ValidatedBy::Token,
            sql,
            policy,
        ));
    }

    let mut violations: Vec<String> = Vec::new();
    let mut validated_by = ValidatedBy::Token;
    let tokens = tokenize(sql);

    // Forbidden keywords always apply; string literals are exempt.
    if !policy.forbidden_keywords.is_empty() {
        let forbidden: HashSet<String> = policy
            .forbidden_keywords
            .iter()
            .map(|k| k.to_ascii_uppercase())
            .collect();
        match &tokens {
            Ok(tokens) => {
                for token in tokens {
                    if token.kind != TokenKind::StringLit && forbidden.contains(&token.upper()) {
                        violations.push(format!("Forbidden keyword: {}", token.upper()));
                    }
                }
            }
            Err(_) => {
                validated_by = ValidatedBy::RegexFallback;
                let stripped = strip_string_literals(sql);
                for keyword in &forbidden {
                    let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
                    if Regex::new(&pattern)
                        .map(|re| re.is_match(&stripped))
                        .unwrap_or(false)
                    {
                        violations.push(format!("Forbidden keyword: {keyword}"));
                    }
                }
            }
        }
    }

    if policy.read_only {
        match parse(sql) {
            Err(_) => {
                // Fail closed: nothing downstream may re-open this gate.
                violations.push("SQL parsing failed (cannot validate read-only safely)".into());
                return Err(violation_error(violations, validated_by, sql, policy));
            }
            Ok(doc) => {
                if doc.statements.is_empty() {
                    violations.push("Empty SQL statement".into());
                }
                let mut saw_allowed_call = false;
                for stmt in &doc.statements {
                    match stmt.kind {
                        StatementKind::Select | StatementKind::With => {}
                        StatementKind::Call => match stmt.call_schema() {
                            Some(schema) if READ_ONLY_CALL_SCHEMAS.contains(&schema.as_str()) => {
                                saw_allowed_call = true;
                            }
                            _ => violations.push(
                                "CALL is only permitted for read-only catalog procedures \
                                 (QSYS2, SYSTOOLS, QSYS)"
                                    .into(),
                            ),
                        },
                        other => {
                            violations.push(format!(
                                "Write operation not permitted: {}",
                                other.as_str()
                            ));
                        }
                    }
                    for nested in &stmt.nested_kinds {
                        if *nested != StatementKind::Select {
                            violations.push(format!(
                                "Nested statement must be SELECT, found {}",
                                nested.as_str()
                            ));
                        }
                    }
                }

                // Extra regex coverage on the literal-stripped text for
                // shapes the structural walk can miss. CALL is scanned
                // only when no structurally-allowed CALL is present.
                let stripped = strip_string_literals(sql);
                for op in DANGEROUS_OPERATIONS {
                    if *op == "CALL" && saw_allowed_call {
                        continue;
                    }
                    if dangerous_op_regex(op).is_match(&stripped) {
                        let message = format!("Dangerous operation detected: {op}");
                        if !violations.iter().any(|v| v == &message) {
                            violations.push(message);
                        }
                    }
                }
                for func in DANGEROUS_FUNCTIONS {
                    if dangerous_fn_regex(func).is_match(&stripped) {
                        violations.push(format!("Dangerous function call detected: {func}"));
                    }
                }
                for (pattern, label) in structural_patterns() {
                    if pattern.is_match(&stripped) {
                        violations.push(format!("Dangerous pattern detected: {label}"));
                    }
                }
            }
        }
    }

    if violations.is_empty() {
        Ok(validated_by)
    } else {
        Err(violation_error(violations, validated_by, sql, policy))
    }
}

/// Replace single-quoted literals (with `''` escapes) by empty literals.
pub fn strip_string_literals(sql: &str) -> String {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let re = LITERAL.get_or_init(|| Regex::new(r"'(?:''|[^'])*'").expect("static regex"));
    re.replace_all(sql, "''").into_owned()
}

fn dangerous_op_regex(op: &str) -> &'static Regex {
    static CACHE: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| {
        DANGEROUS_OPERATIONS
            .iter()
            .map(|op| {
                let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(op)))
                    .expect("static regex");
                (op.to_string(), re)
            })
            .collect()
    });
    &cache
        .iter()
        .find(|(name, _)| name == op)
        .expect("operation registered")
        .1
}

fn dangerous_fn_regex(func: &str) -> &'static Regex {
    static CACHE: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| {
        DANGEROUS_FUNCTIONS
            .iter()
            .map(|f| {
                let re = Regex::new(&format!(r"(?i)\b{}\s*\(", regex::escape(f)))
                    .expect("static regex");
                (f.to_string(), re)
            })
            .collect()
    });
    &cache
        .iter()
        .find(|(name, _)| name == func)
        .expect("function registered")
        .1
}

fn structural_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i);\s*(DROP|DELETE|INSERT|UPDATE|CREATE|ALTER)\b")
                    .expect("static regex"),
                "statement chaining",
            ),
            (
                Regex::new(r"(?i)UNION\s+(ALL\s+)?\(\s*(DROP|DELETE|INSERT|UPDATE)\b")
                    .expect("static regex"),
                "union injection",
            ),
            (
                Regex::new(r"(?i)\bREPLACE\s+INTO\b").expect("static regex"),
                "REPLACE INTO",
            ),
        ]
    })
}

fn violation_error(
    violations: Vec<String>,
    validated_by: ValidatedBy,
    sql: &str,
    policy: &SecurityPolicy,
) -> McpError {
    let preview: String = if sql.len() > QUERY_PREVIEW_LEN {
        let cut = sql
            .char_indices()
            .take_while(|(i, _)| *i < QUERY_PREVIEW_LEN)
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        format!("{}…", &sql[..cut])
    } else {
        sql.to_string()
    };
    let summary = violations.join("; ");
    McpError::validation(format!("SQL security validation failed: {summary}")).with_details(json!({
        "violations": violations,
        "validatedBy": validated_by.as_str(),
        "query": preview,
        "readOnly": policy.read_only,
        "maxLength": policy.max_query_length,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_only() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    fn violations_of(err: McpError) -> Vec<String> {
        err.details()
            .and_then(|d| d.get("violations"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_plain_select_passes() {
        assert!(validate("SELECT * FROM qsys2.user_info_basic WHERE x = ?", &read_only()).is_ok());
        assert!(validate(
            "WITH cte AS (SELECT 1 FROM sysibm.sysdummy1) SELECT * FROM cte",
            &read_only()
        )
        .is_ok());
    }

    #[test]
    fn test_insert_rejected() {
        let err = validate("INSERT INTO t(x) VALUES(1)", &read_only()).unwrap_err();
        let violations = violations_of(err);
        assert!(violations.iter().any(|v| v.contains("INSERT")));
    }

    #[test]
    fn test_nested_write_rejected() {
        let err = validate("SELECT * FROM (DELETE FROM events) x", &read_only()).unwrap_err();
        assert!(violations_of(err)
            .iter()
            .any(|v| v.contains("Nested statement")));
    }

    #[test]
    fn test_literal_vs_keyword() {
        let policy = SecurityPolicy {
            forbidden_keywords: vec!["DROP".into()],
            ..SecurityPolicy::default()
        };
        assert!(validate("SELECT 'DROP TABLE X' AS txt FROM sysibm.sysdummy1", &policy).is_ok());

        let err = validate("DROP TABLE users", &policy).unwrap_err();
        assert!(violations_of(err)
            .iter()
            .any(|v| v == "Forbidden keyword: DROP"));
    }

    #[test]
    fn test_fail_closed_on_parse_failure() {
        let err = validate("SELECT * FROM WHERE", &read_only()).unwrap_err();
        assert!(violations_of(err)
            .iter()
            .any(|v| v == "SQL parsing failed (cannot validate read-only safely)"));
    }

    #[test]
    fn test_fail_closed_on_unmatched_quote() {
        let err = validate("SELECT 'oops FROM t", &read_only()).unwrap_err();
        assert!(violations_of(err)
            .iter()
            .any(|v| v.contains("parsing failed")));
    }

    #[test]
    fn test_qsys2_call_allowed() {
        assert!(validate("CALL QSYS2.GENERATE_SQL('T', 'LIB', 'TABLE')", &read_only()).is_ok());
        assert!(validate("CALL SYSTOOLS.CHECK_SYSCST('X')", &read_only()).is_ok());
    }

    #[test]
    fn test_unqualified_call_rejected() {
        let err = validate("CALL my_schema.my_proc('x')", &read_only()).unwrap_err();
        assert!(violations_of(err).iter().any(|v| v.contains("CALL")));
        let err = validate("CALL do_things()", &read_only()).unwrap_err();
        assert!(violations_of(err).iter().any(|v| v.contains("CALL")));
    }

    #[test]
    fn test_dangerous_function_rejected() {
        let err = validate("SELECT * FROM TABLE(QCMDEXC('DLTLIB QTEMP')) x", &read_only())
            .unwrap_err();
        assert!(violations_of(err)
            .iter()
            .any(|v| v.contains("QCMDEXC")));
    }

    #[test]
    fn test_benign_functions_pass() {
        assert!(validate(
            "SELECT CONCAT(a, b), CHAR(c), VARCHAR(d, 10) FROM t",
            &read_only()
        )
        .is_ok());
    }

    #[test]
    fn test_infix_concat_passes() {
        assert!(validate("SELECT 'R' CONCAT code FROM t", &read_only()).is_ok());
    }

    #[test]
    fn test_statement_chaining_rejected() {
        let err = validate("SELECT 1 FROM a; DROP TABLE users", &read_only()).unwrap_err();
        let violations = violations_of(err);
        assert!(violations.iter().any(|v| v.contains("DROP")));
    }

    #[test]
    fn test_write_allowed_when_read_only_disabled() {
        let policy = SecurityPolicy {
            read_only: false,
            ..SecurityPolicy::default()
        };
        assert!(validate("INSERT INTO audit_log(x) VALUES(1)", &policy).is_ok());
    }

    #[test]
    fn test_length_boundary() {
        let policy = SecurityPolicy {
            max_query_length: 30,
            ..SecurityPolicy::default()
        };
        let exact = "SELECT * FROM t WHERE a = 'xx'";
        assert_eq!(exact.len(), 30);
        assert!(validate(exact, &policy).is_ok());

        let over = "SELECT * FROM t WHERE a = 'xxx'";
        let err = validate(over, &policy).unwrap_err();
        assert!(violations_of(err).iter().any(|v| v.contains("exceeds maximum")));
    }

    #[test]
    fn test_forbidden_keyword_fallback_on_lex_failure() {
        // Unmatched quote forces the regex fallback for the keyword layer.
        let policy = SecurityPolicy {
            read_only: false,
            forbidden_keywords: vec!["DROP".into()],
            ..SecurityPolicy::default()
        };
        let err = validate("DROP TABLE t WHERE x = 'oops", &policy).unwrap_err();
        let details = err.details().cloned().unwrap();
        assert_eq!(details["validatedBy"], "regex-fallback");
    }

    #[test]
    fn test_query_preview_truncated() {
        let long = format!("INSERT INTO t VALUES ('{}')", "x".repeat(200));
        let err = validate(&long, &read_only()).unwrap_err();
        let details = err.details().cloned().unwrap();
        let preview = details["query"].as_str().unwrap();
        assert!(preview.ends_with('…'));
        assert!(preview.chars().count() <= 101);
    }
}
