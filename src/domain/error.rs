//! Domain parsing errors.

use thiserror::Error;

/// Result type for domain parsing.
pub type DomainResult<T> = Result<T, DomainError>;

/// Errors raised while turning a filter string into a domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),
}

impl From<sqlparser::parser::ParserError> for DomainError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        DomainError::Syntax(e.to_string())
    }
}
