//! kubedump filter language.
//!
//! Filters are prefix expressions over resources:
//!
//! ```text
//! and (namespace prod-*) (or (pod web-*) (label app=api))
//! ```
//!
//! Resource patterns take the form `[namespace/]name` (namespace defaults to `default`),
//! and every pattern understands the shell wildcards `*` and `?`. Literal segments must be
//! valid RFC 1123 names.

#![forbid(unsafe_code)]

mod expr;
mod lexer;
mod parser;
mod pattern;

pub use expr::Expression;
pub use lexer::{tokenize, Token};
pub use parser::parse;
pub use pattern::{Pattern, Segment};

/// Why a filter failed to compile. None of these are recoverable inside the parser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed pattern {0:?}: expected [namespace/]name")]
    MalformedPattern(String),
    #[error("invalid {what} {value:?}: {reason}")]
    InvalidDns { what: &'static str, value: String, reason: &'static str },
    #[error("missing operand for '{0}'")]
    MissingOperand(String),
    #[error("unexpected trailing tokens: {0}")]
    TrailingTokens(String),
    #[error("empty label key in {0:?}")]
    EmptyLabelKey(String),
    #[error("unbalanced parenthesis")]
    UnbalancedParen,
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
}

impl std::str::FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
