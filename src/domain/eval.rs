//! Domain evaluation against records.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Clause, Domain, Operator};
use crate::storage::Record;

pub(crate) fn matches(domain: &Domain, record: &Record) -> bool {
    match domain {
        Domain::All => true,
        Domain::Clause(clause) => matches_clause(clause, record),
        Domain::And(items) => items.iter().all(|d| matches(d, record)),
        Domain::Or(items) => items.iter().any(|d| matches(d, record)),
        Domain::Not(inner) => !matches(inner, record),
    }
}

fn matches_clause(clause: &Clause, record: &Record) -> bool {
    // a missing field compares as NULL
    let actual = record.field(&clause.field).unwrap_or(Value::Null);
    let expected = &clause.value;

    match clause.operator {
        Operator::Eq => values_equal(&actual, expected),
        Operator::NotEq => !values_equal(&actual, expected),
        Operator::Lt => compare(&actual, expected) == Some(Ordering::Less),
        Operator::LtEq => matches!(compare(&actual, expected), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => compare(&actual, expected) == Some(Ordering::Greater),
        Operator::GtEq => {
            matches!(compare(&actual, expected), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::Like => like(&actual, expected, false).unwrap_or(false),
        Operator::NotLike => like(&actual, expected, false).map(|m| !m).unwrap_or(false),
        Operator::ILike => like(&actual, expected, true).unwrap_or(false),
        Operator::NotILike => like(&actual, expected, true).map(|m| !m).unwrap_or(false),
        Operator::In => expected
            .as_array()
            .map(|items| items.iter().any(|item| values_equal(&actual, item)))
            .unwrap_or(false),
        Operator::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|item| values_equal(&actual, item)))
            .unwrap_or(false),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// `None` when either side is not a string.
fn like(actual: &Value, pattern: &Value, case_insensitive: bool) -> Option<bool> {
    let (text, pattern) = (actual.as_str()?, pattern.as_str()?);
    let tokens = tokenize(pattern);
    let chars: Vec<char> = if case_insensitive {
        text.to_lowercase().chars().collect()
    } else {
        text.chars().collect()
    };
    let tokens = if case_insensitive {
        tokens.into_iter().map(Token::lowercase).collect()
    } else {
        tokens
    };
    Some(match_like(&chars, &tokens))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    /// `%`
    Any,
    /// `_`
    One,
    Literal(char),
}

impl Token {
    fn lowercase(self) -> Token {
        match self {
            Token::Literal(c) => {
                let mut lower = c.to_lowercase();
                match (lower.next(), lower.next()) {
                    (Some(l), None) => Token::Literal(l),
                    _ => Token::Literal(c),
                }
            }
            other => other,
        }
    }
}

/// Split a pattern into tokens; `\` makes the next character literal.
fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => tokens.push(Token::Literal(chars.next().unwrap_or('\\'))),
            '%' => {
                // consecutive wildcards are equivalent to one
                if tokens.last() != Some(&Token::Any) {
                    tokens.push(Token::Any);
                }
            }
            '_' => tokens.push(Token::One),
            c => tokens.push(Token::Literal(c)),
        }
    }
    tokens
}

/// Greedy wildcard match. On a mismatch the last `%` absorbs one more
/// character and matching resumes after it, so the cost is O(len(s) * len(p)).
fn match_like(s: &[char], p: &[Token]) -> bool {
    let (mut si, mut pi) = (0, 0);
    // position of the last `%` and the text index it resumes from
    let mut backtrack: Option<(usize, usize)> = None;

    while si < s.len() {
        match p.get(pi) {
            Some(Token::Any) => {
                backtrack = Some((pi, si));
                pi += 1;
            }
            Some(Token::One) => {
                si += 1;
                pi += 1;
            }
            Some(Token::Literal(c)) if s[si] == *c => {
                si += 1;
                pi += 1;
            }
            _ => match backtrack {
                Some((star, resume)) => {
                    pi = star + 1;
                    si = resume + 1;
                    backtrack = Some((star, resume + 1));
                }
                None => return false,
            },
        }
    }

    p[pi..].iter().all(|t| *t == Token::Any)
}
