//! SQL lexer for the Db2 for i dialect.
//!
//! Structured after a hand-rolled scanner: peekable char indices, one
//! token per loop turn, comments and whitespace elided. Byte offsets are
//! preserved so the parameter rewriter can splice the original text.

use crate::keywords::is_keyword;
use crate::token::{Token, TokenKind};
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// A classifiable lexing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {offset}")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self { message: message.into(), offset }
    }
}

/// Tokenize `sql` into semantic tokens.
///
/// Fails on unmatched quotes, unterminated block comments, and `:<digit>`
/// parameter syntax. Callers enforcing read-only policy must treat a
/// failure here as fail-closed.
pub fn tokenize(sql: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(sql).run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        while let Some(&(offset, ch)) = self.chars.peek() {
            match ch {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '-' if self.peek_second() == Some('-') => self.skip_line_comment(),
                '/' if self.peek_second() == Some('*') => self.skip_block_comment(offset)?,
                '\'' => tokens.push(self.string_literal(offset)?),
                '"' => tokens.push(self.quoted_identifier(offset)?),
                '(' => tokens.push(self.single(TokenKind::OpenParen, offset)),
                ')' => tokens.push(self.single(TokenKind::CloseParen, offset)),
                ',' => tokens.push(self.single(TokenKind::Comma, offset)),
                ';' => tokens.push(self.single(TokenKind::Semicolon, offset)),
                '.' => tokens.push(self.single(TokenKind::Dot, offset)),
                ':' => tokens.push(self.named_parameter(offset)?),
                c if c.is_ascii_digit() => tokens.push(self.number(offset)),
                c if is_ident_start(c) => tokens.push(self.word(offset)),
                _ => tokens.push(self.operator(offset)),
            }
        }
        Ok(tokens)
    }

    fn peek_second(&self) -> Option<char> {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        lookahead.next().map(|(_, c)| c)
    }

    fn single(&mut self, kind: TokenKind, offset: usize) -> Token {
        let (_, ch) = self.chars.next().expect("peeked");
        Token::new(kind, ch.to_string(), offset)
    }

    fn skip_line_comment(&mut self) {
        for (_, ch) in self.chars.by_ref() {
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self, start: usize) -> Result<(), SyntaxError> {
        self.chars.next(); // '/'
        self.chars.next(); // '*'
        let mut prev = '\0';
        for (_, ch) in self.chars.by_ref() {
            if prev == '*' && ch == '/' {
                return Ok(());
            }
            prev = ch;
        }
        Err(SyntaxError::new("Unterminated block comment", start))
    }

    /// Single-quoted literal with `''` escapes, quotes kept in the text.
    fn string_literal(&mut self, start: usize) -> Result<Token, SyntaxError> {
        self.chars.next(); // opening quote
        loop {
            match self.chars.next() {
                Some((end, '\'')) => {
                    if matches!(self.chars.peek(), Some(&(_, '\''))) {
                        self.chars.next(); // escaped quote, keep scanning
                        continue;
                    }
                    let text = &self.source[start..end + 1];
                    return Ok(Token::new(TokenKind::StringLit, text, start));
                }
                Some(_) => {}
                None => return Err(SyntaxError::new("Unmatched single quote", start)),
            }
        }
    }

    fn quoted_identifier(&mut self, start: usize) -> Result<Token, SyntaxError> {
        self.chars.next(); // opening quote
        for (end, ch) in self.chars.by_ref() {
            if ch == '"' {
                let text = &self.source[start..end + 1];
                return Ok(Token::new(TokenKind::Word, text, start));
            }
        }
        Err(SyntaxError::new("Unmatched double quote", start))
    }

    fn named_parameter(&mut self, start: usize) -> Result<Token, SyntaxError> {
        self.chars.next(); // ':'
        match self.chars.peek() {
            Some(&(_, c)) if is_ident_start(c) => {
                let mut end = start + 1;
                while let Some(&(idx, c)) = self.chars.peek() {
                    if is_ident_continue(c) {
                        end = idx + c.len_utf8();
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Ok(Token::new(TokenKind::Parameter, &self.source[start..end], start))
            }
            Some(&(_, c)) if c.is_ascii_digit() => Err(SyntaxError::new(
                "Invalid named parameter syntax: parameter names cannot start with a digit",
                start,
            )),
            // Bare colon (e.g. array slice syntax) stays an operator.
            _ => Ok(Token::new(TokenKind::Operator, ":", start)),
        }
    }

    fn number(&mut self, start: usize) -> Token {
        let mut end = start;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(&(idx, c)) = self.chars.peek() {
            let take = c.is_ascii_digit()
                || (c == '.' && !seen_dot && !seen_exp)
                || ((c == 'e' || c == 'E') && !seen_exp && idx > start)
                || ((c == '+' || c == '-') && seen_exp && self.source[..idx].ends_with(['e', 'E']));
            if !take {
                break;
            }
            if c == '.' {
                seen_dot = true;
            }
            if c == 'e' || c == 'E' {
                seen_exp = true;
            }
            end = idx + c.len_utf8();
            self.chars.next();
        }
        Token::new(TokenKind::Number, &self.source[start..end], start)
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(idx, c)) = self.chars.peek() {
            if is_ident_continue(c) {
                end = idx + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.source[start..end];
        let kind = if is_keyword(text) {
            TokenKind::Keyword
        } else {
            TokenKind::Word
        };
        Token::new(kind, text, start)
    }

    fn operator(&mut self, start: usize) -> Token {
        let (_, first) = self.chars.next().expect("peeked");
        if let Some(&(_, second)) = self.chars.peek() {
            let pair: String = [first, second].iter().collect();
            if matches!(pair.as_str(), "<=" | ">=" | "<>" | "!=" | "||" | "=>" | "**") {
                self.chars.next();
                return Token::new(TokenKind::Operator, pair, start);
            }
        }
        Token::new(TokenKind::Operator, first.to_string(), start)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$' || c == '#' || c == '@'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '#' || c == '@'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_basic_select() {
        let tokens = tokenize("SELECT a, b FROM qsys2.user_info_basic").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].text, "a");
        assert_eq!(tokens[2].kind, TokenKind::Comma);
        assert_eq!(tokens[5].text, "qsys2");
        assert_eq!(tokens[6].kind, TokenKind::Dot);
    }

    #[test]
    fn test_double_single_quote_escape() {
        let tokens = tokenize("SELECT 'can''t' FROM t").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::StringLit);
        assert_eq!(tokens[1].text, "'can''t'");
    }

    #[test]
    fn test_unmatched_quote_fails() {
        assert!(tokenize("SELECT 'oops FROM t").is_err());
        assert!(tokenize("SELECT \"oops FROM t").is_err());
    }

    #[test]
    fn test_named_parameter() {
        let tokens = tokenize("WHERE name = :username AND id IN (:ids)").unwrap();
        let params: Vec<_> = tokens
            .iter()
            .filter_map(|t| t.parameter_name())
            .collect();
        assert_eq!(params, vec!["username", "ids"]);
    }

    #[test]
    fn test_digit_parameter_rejected() {
        let err = tokenize("WHERE id = :1").unwrap_err();
        assert!(err.message.contains("named parameter"));
    }

    #[test]
    fn test_infix_concat_is_keyword() {
        let tokens = tokenize("SELECT 'R' CONCAT code FROM t").unwrap();
        assert!(tokens[2].is_keyword("CONCAT"));
    }

    #[test]
    fn test_comments_elided() {
        let tokens = tokenize("SELECT 1 -- INSERT INTO x\n/* DROP */ FROM t").unwrap();
        assert!(!tokens.iter().any(|t| t.upper() == "INSERT" || t.upper() == "DROP"));
    }

    #[test]
    fn test_literal_not_keyword() {
        let tokens = tokenize("SELECT 'DROP TABLE X' AS txt").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::StringLit);
    }

    #[test]
    fn test_fetch_first_clause() {
        let tokens = tokenize("SELECT * FROM t FETCH FIRST 10 ROWS ONLY").unwrap();
        let keywords: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Keyword)
            .map(|t| t.upper())
            .collect();
        assert!(keywords.contains(&"FETCH".to_string()));
        assert!(keywords.contains(&"ONLY".to_string()));
    }

    #[test]
    fn test_operators_and_question_mark() {
        let tokens = tokenize("WHERE a >= ? AND b || c <> ?").unwrap();
        let ops: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.text.clone())
            .collect();
        assert_eq!(ops, vec![">=", "?", "||", "<>", "?"]);
    }

    #[test]
    fn test_kind_sequence_for_call() {
        assert_eq!(
            kinds("CALL QSYS2.QCMDEXC('WRKACTJOB')"),
            vec![
                TokenKind::Keyword,
                TokenKind::Word,
                TokenKind::Dot,
                TokenKind::Word,
                TokenKind::OpenParen,
                TokenKind::StringLit,
                TokenKind::CloseParen,
            ]
        );
    }
}
