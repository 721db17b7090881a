//! Statement grouping and classification.
//!
//! Tokens are grouped into statements at top-level semicolons, classified
//! by their leading verb, and scanned for parenthesized sub-statements so
//! the security validator can traverse nested nodes.

use crate::lexer::{tokenize, SyntaxError};
use crate::token::{Token, TokenKind};

/// Statement classification, keyed off the leading verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    With,
    Insert,
    Update,
    Delete,
    Merge,
    Truncate,
    Drop,
    Create,
    Alter,
    Rename,
    Call,
    Exec,
    Set,
    Declare,
    Grant,
    Revoke,
    Deny,
    Load,
    Import,
    Export,
    Bulk,
    Shutdown,
    Restart,
    Kill,
    Stop,
    Start,
    Backup,
    Restore,
    Dump,
    Lock,
    Unlock,
    Commit,
    Rollback,
    Savepoint,
    Unknown,
}

impl StatementKind {
    /// Classify a leading verb; `None` when the word starts no statement.
    pub fn from_verb(word: &str) -> Option<Self> {
        let kind = match word.to_ascii_uppercase().as_str() {
            "SELECT" | "VALUES" => Self::Select,
            "WITH" => Self::With,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "TRUNCATE" => Self::Truncate,
            "DROP" => Self::Drop,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "RENAME" => Self::Rename,
            "CALL" => Self::Call,
            "EXEC" | "EXECUTE" => Self::Exec,
            "SET" => Self::Set,
            "DECLARE" => Self::Declare,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            "DENY" => Self::Deny,
            "LOAD" => Self::Load,
            "IMPORT" => Self::Import,
            "EXPORT" => Self::Export,
            "BULK" => Self::Bulk,
            "SHUTDOWN" => Self::Shutdown,
            "RESTART" => Self::Restart,
            "KILL" => Self::Kill,
            "STOP" => Self::Stop,
            "START" => Self::Start,
            "BACKUP" => Self::Backup,
            "RESTORE" => Self::Restore,
            "DUMP" => Self::Dump,
            "LOCK" => Self::Lock,
            "UNLOCK" => Self::Unlock,
            "COMMIT" => Self::Commit,
            "ROLLBACK" => Self::Rollback,
            "SAVEPOINT" => Self::Savepoint,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::With => "WITH",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Merge => "MERGE",
            Self::Truncate => "TRUNCATE",
            Self::Drop => "DROP",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Rename => "RENAME",
            Self::Call => "CALL",
            Self::Exec => "EXEC",
            Self::Set => "SET",
            Self::Declare => "DECLARE",
            Self::Grant => "GRANT",
            Self::Revoke => "REVOKE",
            Self::Deny => "DENY",
            Self::Load => "LOAD",
            Self::Import => "IMPORT",
            Self::Export => "EXPORT",
            Self::Bulk => "BULK",
            Self::Shutdown => "SHUTDOWN",
            Self::Restart => "RESTART",
            Self::Kill => "KILL",
            Self::Stop => "STOP",
            Self::Start => "START",
            Self::Backup => "BACKUP",
            Self::Restore => "RESTORE",
            Self::Dump => "DUMP",
            Self::Lock => "LOCK",
            Self::Unlock => "UNLOCK",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Savepoint => "SAVEPOINT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// One classified statement with its token run.
#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub tokens: Vec<Token>,
    /// Classification of every parenthesized sub-statement, in order.
    pub nested_kinds: Vec<StatementKind>,
}

impl Statement {
    /// Qualifying schema of the first procedure after `CALL`, uppercased.
    ///
    /// Returns `None` when the statement is not a CALL or the procedure is
    /// unqualified. Only the first identifier after CALL is examined.
    pub fn call_schema(&self) -> Option<String> {
        let mut iter = self.tokens.iter();
        iter.find(|t| t.is_keyword("CALL"))?;
        let schema = iter.next()?;
        if !matches!(schema.kind, TokenKind::Word | TokenKind::Keyword) {
            return None;
        }
        match iter.next() {
            Some(dot) if dot.kind == TokenKind::Dot => Some(schema.upper()),
            _ => None,
        }
    }

    /// Token texts joined with single spaces (whitespace-normalized form).
    pub fn normalized(&self) -> String {
        let texts: Vec<&str> = self.tokens.iter().map(|t| t.text.as_str()).collect();
        texts.join(" ")
    }
}

/// An ordered list of statements parsed from one input.
#[derive(Debug, Clone)]
pub struct Document {
    pub statements: Vec<Statement>,
}

/// Parse `sql` into classified statements.
///
/// Fails on lexing errors, unbalanced parentheses (statement boundaries
/// ambiguous), and a handful of structural impossibilities (`FROM` with no
/// table reference, `WHERE` with no predicate) that a permissive token
/// scan would otherwise wave through.
pub fn parse(sql: &str) -> Result<Document, SyntaxError> {
    let tokens = tokenize(sql)?;
    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth: i32 = 0;

    for token in tokens {
        match token.kind {
            TokenKind::OpenParen => {
                depth += 1;
                current.push(token);
            }
            TokenKind::CloseParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(SyntaxError {
                        message: "Unbalanced parentheses".into(),
                        offset: token.offset,
                    });
                }
                current.push(token);
            }
            TokenKind::Semicolon if depth == 0 => {
                if !current.is_empty() {
                    statements.push(build_statement(std::mem::take(&mut current))?);
                }
            }
            _ => current.push(token),
        }
    }

    if depth != 0 {
        return Err(SyntaxError {
            message: "Unbalanced parentheses".into(),
            offset: sql.len(),
        });
    }
    if !current.is_empty() {
        statements.push(build_statement(current)?);
    }

    Ok(Document { statements })
}

fn build_statement(tokens: Vec<Token>) -> Result<Statement, SyntaxError> {
    let kind = tokens
        .first()
        .and_then(|t| match t.kind {
            TokenKind::Keyword => StatementKind::from_verb(&t.text),
            _ => None,
        })
        .unwrap_or(StatementKind::Unknown);

    validate_structure(&tokens)?;

    let mut nested_kinds = Vec::new();
    for window in tokens.windows(2) {
        if window[0].kind == TokenKind::OpenParen && window[1].kind == TokenKind::Keyword {
            if let Some(nested) = StatementKind::from_verb(&window[1].text) {
                // VALUES inside parens is an expression list, not a statement.
                if !window[1].text.eq_ignore_ascii_case("VALUES") {
                    nested_kinds.push(nested);
                }
            }
        }
    }

    Ok(Statement { kind, tokens, nested_kinds })
}

/// Clause keywords that cannot directly follow `FROM`.
const NOT_A_TABLE_REF: &[&str] = &["WHERE", "GROUP", "HAVING", "ORDER", "FETCH", "UNION", "ON"];

fn validate_structure(tokens: &[Token]) -> Result<(), SyntaxError> {
    for (idx, token) in tokens.iter().enumerate() {
        if token.is_keyword("FROM") {
            match tokens.get(idx + 1) {
                None | Some(Token { kind: TokenKind::CloseParen, .. }) => {
                    return Err(SyntaxError {
                        message: "Expected table reference after FROM".into(),
                        offset: token.offset,
                    });
                }
                Some(next)
                    if next.kind == TokenKind::Keyword
                        && NOT_A_TABLE_REF.iter().any(|kw| next.is_keyword(kw)) =>
                {
                    return Err(SyntaxError {
                        message: "Expected table reference after FROM".into(),
                        offset: next.offset,
                    });
                }
                _ => {}
            }
        }
        if token.is_keyword("WHERE") {
            match tokens.get(idx + 1) {
                None | Some(Token { kind: TokenKind::CloseParen, .. }) => {
                    return Err(SyntaxError {
                        message: "Expected predicate after WHERE".into(),
                        offset: token.offset,
                    });
                }
                _ => {}
            }
        }
        if token.is_keyword("SELECT") {
            if let Some(next) = tokens.get(idx + 1) {
                if next.is_keyword("FROM") {
                    return Err(SyntaxError {
                        message: "Empty select list".into(),
                        offset: next.offset,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let doc = parse("SELECT * FROM t").unwrap();
        assert_eq!(doc.statements[0].kind, StatementKind::Select);

        let doc = parse("WITH cte AS (SELECT 1 FROM a) SELECT * FROM cte").unwrap();
        assert_eq!(doc.statements[0].kind, StatementKind::With);
        assert_eq!(doc.statements[0].nested_kinds, vec![StatementKind::Select]);

        let doc = parse("INSERT INTO t (x) VALUES (1)").unwrap();
        assert_eq!(doc.statements[0].kind, StatementKind::Insert);
    }

    #[test]
    fn test_multiple_statements() {
        let doc = parse("SELECT 1 FROM a; DROP TABLE users").unwrap();
        assert_eq!(doc.statements.len(), 2);
        assert_eq!(doc.statements[0].kind, StatementKind::Select);
        assert_eq!(doc.statements[1].kind, StatementKind::Drop);
    }

    #[test]
    fn test_trailing_semicolon() {
        let doc = parse("SELECT 1 FROM a;").unwrap();
        assert_eq!(doc.statements.len(), 1);
    }

    #[test]
    fn test_nested_write_detected() {
        let doc = parse("SELECT * FROM (DELETE FROM events) AS x").unwrap();
        assert_eq!(doc.statements[0].nested_kinds, vec![StatementKind::Delete]);
    }

    #[test]
    fn test_call_schema() {
        let doc = parse("CALL QSYS2.QCMDEXC('DSPLIB')").unwrap();
        assert_eq!(doc.statements[0].call_schema().as_deref(), Some("QSYS2"));

        let doc = parse("CALL my_proc('x')").unwrap();
        assert_eq!(doc.statements[0].call_schema(), None);
    }

    #[test]
    fn test_malformed_from_fails() {
        assert!(parse("SELECT * FROM WHERE").is_err());
        assert!(parse("SELECT FROM t").is_err());
        assert!(parse("SELECT * FROM t WHERE").is_err());
    }

    #[test]
    fn test_unbalanced_parens_fail() {
        assert!(parse("SELECT * FROM (SELECT 1 FROM a").is_err());
        assert!(parse("SELECT 1 FROM a)").is_err());
    }

    #[test]
    fn test_table_function_parses() {
        let doc = parse(
            "SELECT * FROM TABLE(QSYS2.IFS_OBJECT_STATISTICS(START_PATH_NAME => '/')) x",
        )
        .unwrap();
        assert_eq!(doc.statements[0].kind, StatementKind::Select);
        assert!(doc.statements[0].nested_kinds.is_empty());
    }

    #[test]
    fn test_normalized_round_trip() {
        let doc = parse("SELECT   a ,  b\nFROM   t").unwrap();
        assert_eq!(doc.statements[0].normalized(), "SELECT a , b FROM t");
    }
}
