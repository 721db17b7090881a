//! Db2 for i SQL handling: tokenizer, statement parser, parameter
//! processor, and the read-only security validator.
//!
//! The lexer understands the Db2 dialect (double-single-quote escapes,
//! infix `CONCAT`, `:name` parameters, `QSYS2.*` calls, CTEs,
//! `FETCH FIRST n ROWS ONLY`). The guard builds on the lexer and fails
//! closed whenever the lexer cannot make sense of a query.

pub mod guard;
pub mod keywords;
pub mod lexer;
pub mod params;
pub mod statement;
pub mod token;
pub mod value;

pub use guard::{validate, SecurityPolicy, ValidatedBy};
pub use lexer::{tokenize, SyntaxError};
pub use params::{process, ParamType, ParameterDefinition, ParameterMode, ProcessedSql};
pub use statement::{parse, Document, Statement, StatementKind};
pub use token::{Token, TokenKind};
pub use value::SqlValue;
