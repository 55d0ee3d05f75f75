//! Search domains.
//!
//! A domain is the filter passed to `Model::search`: clauses of the form
//! `field operator value`, combined with AND, OR and NOT. Domains can be
//! built in code or parsed from a SQL `WHERE`-style string:
//!
//! ```ignore
//! use portaldb::domain::{Domain, Operator};
//!
//! let by_code = Domain::eq("code", "abc");
//! let parsed = Domain::parse("code = 'abc' AND begin_byte >= 10")?;
//! let collision = by_code.and(Domain::from(("algorithm", Operator::Eq, "sha256")));
//! ```

mod error;
mod eval;
mod parser;

use std::fmt;

use serde_json::Value;

use crate::storage::Record;

pub use error::{DomainError, DomainResult};

/// Comparison operator of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
}

impl Operator {
    /// Pattern operators whose operand takes `%` and `_` wildcards.
    pub fn is_like(&self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "like",
            Operator::NotLike => "not like",
            Operator::ILike => "ilike",
            Operator::NotILike => "not ilike",
            Operator::In => "in",
            Operator::NotIn => "not in",
        }
    }

    /// The operator with its operands swapped (`5 < x` is `x > 5`).
    pub(crate) fn flipped(&self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Eq),
            Operator::NotEq => Some(Operator::NotEq),
            Operator::Lt => Some(Operator::Gt),
            Operator::LtEq => Some(Operator::GtEq),
            Operator::Gt => Some(Operator::Lt),
            Operator::GtEq => Some(Operator::LtEq),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Operator {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match normalized.as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::LtEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::GtEq),
            "like" => Ok(Operator::Like),
            "not like" => Ok(Operator::NotLike),
            "ilike" => Ok(Operator::ILike),
            "not ilike" => Ok(Operator::NotILike),
            "in" => Ok(Operator::In),
            "not in" => Ok(Operator::NotIn),
            _ => Err(DomainError::UnknownOperator(s.to_string())),
        }
    }
}

/// A single `field operator value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Field path; dots descend into JSON objects.
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// A search filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Domain {
    /// Matches every record.
    #[default]
    All,
    Clause(Clause),
    And(Vec<Domain>),
    Or(Vec<Domain>),
    Not(Box<Domain>),
}

impl Domain {
    /// Parse a SQL `WHERE`-style filter. An empty string matches everything.
    pub fn parse(input: &str) -> DomainResult<Self> {
        parser::parse(input)
    }

    /// Build a single clause.
    pub fn clause(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Domain::Clause(Clause {
            field: field.into(),
            operator,
            value: value.into(),
        })
    }

    /// Shorthand for an equality clause.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::clause(field, Operator::Eq, value)
    }

    /// Conjunction, flattening nested ANDs and dropping `All`.
    pub fn and(self, other: Domain) -> Self {
        match (self, other) {
            (Domain::All, d) | (d, Domain::All) => d,
            (Domain::And(mut left), Domain::And(right)) => {
                left.extend(right);
                Domain::And(left)
            }
            (Domain::And(mut left), d) => {
                left.push(d);
                Domain::And(left)
            }
            (d, Domain::And(mut right)) => {
                right.insert(0, d);
                Domain::And(right)
            }
            (left, right) => Domain::And(vec![left, right]),
        }
    }

    /// Disjunction, flattening nested ORs. `All` absorbs the other side.
    pub fn or(self, other: Domain) -> Self {
        match (self, other) {
            (Domain::All, _) | (_, Domain::All) => Domain::All,
            (Domain::Or(mut left), Domain::Or(right)) => {
                left.extend(right);
                Domain::Or(left)
            }
            (Domain::Or(mut left), d) => {
                left.push(d);
                Domain::Or(left)
            }
            (left, right) => Domain::Or(vec![left, right]),
        }
    }

    /// Negation.
    pub fn negate(self) -> Self {
        match self {
            Domain::Not(inner) => *inner,
            d => Domain::Not(Box::new(d)),
        }
    }

    /// Check whether a record satisfies this domain.
    pub fn matches(&self, record: &Record) -> bool {
        eval::matches(self, record)
    }

    /// Escape wildcards in the operands of every pattern clause, so user
    /// input is matched literally; `wrap` turns the operand into a
    /// substring match.
    pub fn escape_like(self, wrap: bool) -> Self {
        match self {
            Domain::Clause(mut clause) => {
                if clause.operator.is_like() {
                    if let Value::String(s) = &clause.value {
                        clause.value = Value::String(escape(s, wrap));
                    }
                }
                Domain::Clause(clause)
            }
            Domain::And(items) => {
                Domain::And(items.into_iter().map(|d| d.escape_like(wrap)).collect())
            }
            Domain::Or(items) => {
                Domain::Or(items.into_iter().map(|d| d.escape_like(wrap)).collect())
            }
            Domain::Not(inner) => Domain::Not(Box::new(inner.escape_like(wrap))),
            Domain::All => Domain::All,
        }
    }
}

impl<F, V> From<(F, Operator, V)> for Domain
where
    F: Into<String>,
    V: Into<Value>,
{
    fn from((field, operator, value): (F, Operator, V)) -> Self {
        Domain::clause(field, operator, value)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::All => write!(f, "TRUE"),
            Domain::Clause(c) => write!(f, "{} {} {}", c.field, c.operator, c.value),
            Domain::And(items) | Domain::Or(items) => {
                let joiner = if matches!(self, Domain::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = items.iter().map(|d| format!("({})", d)).collect();
                write!(f, "{}", parts.join(joiner))
            }
            Domain::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

/// Escape `\`, `%` and `_` so a string matches itself under LIKE.
///
/// With `wrap` the result is surrounded by `%` for substring search.
pub fn escape(input: &str, wrap: bool) -> String {
    let mut escaped = String::with_capacity(input.len() + 2);
    if wrap {
        escaped.push('%');
    }
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    if wrap {
        escaped.push('%');
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape("50%_off", false), "50\\%\\_off");
        assert_eq!(escape("a\\b", false), "a\\\\b");
        assert_eq!(escape("name", true), "%name%");
    }

    #[test]
    fn test_escape_like_only_touches_patterns() {
        let domain = Domain::clause("name", Operator::ILike, "100%")
            .and(Domain::eq("code", "a_b"));
        let escaped = domain.escape_like(true);
        assert_eq!(
            escaped,
            Domain::And(vec![
                Domain::clause("name", Operator::ILike, "%100\\%%"),
                Domain::eq("code", "a_b"),
            ])
        );
    }

    #[test]
    fn test_and_or_flattening() {
        let a = Domain::eq("a", 1);
        let b = Domain::eq("b", 2);
        let c = Domain::eq("c", 3);

        let and = a.clone().and(b.clone()).and(c.clone());
        assert!(matches!(&and, Domain::And(items) if items.len() == 3));
        assert_eq!(Domain::All.and(a.clone()), a);
        assert_eq!(a.clone().or(Domain::All), Domain::All);

        let or = a.clone().or(b).or(c);
        assert!(matches!(&or, Domain::Or(items) if items.len() == 3));
        assert_eq!(a.clone().negate().negate(), a);
    }

    #[test]
    fn test_operator_from_str() {
        assert_eq!("NOT  ILIKE".parse::<Operator>().unwrap(), Operator::NotILike);
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::NotEq);
        assert!("~".parse::<Operator>().is_err());
    }

    #[test]
    fn test_tuple_conversion() {
        let domain = Domain::from(("code", Operator::Eq, "abc"));
        assert_eq!(domain, Domain::eq("code", "abc"));
        assert_eq!(domain.to_string(), "code = \"abc\"");
    }
}
