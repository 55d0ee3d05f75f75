//! Filter string parsing.
//!
//! The filter is parsed as the `WHERE` clause of a generic SQL query with
//! sqlparser, then the expression tree is folded into a `Domain`. Only
//! `column op literal` comparisons are accepted; arbitrary expressions on
//! either side are rejected.

use serde_json::{Number, Value};
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::error::{DomainError, DomainResult};
use super::{Domain, Operator};

pub(crate) fn parse(input: &str) -> DomainResult<Domain> {
    let input = input.trim();
    if input.is_empty() || input == "*" {
        return Ok(Domain::All);
    }

    let sql = format!("SELECT * FROM t WHERE {}", input);
    let statements = SqlParser::parse_sql(&GenericDialect {}, &sql)?;
    if statements.len() != 1 {
        return Err(DomainError::Syntax(format!("unexpected input in filter: {}", input)));
    }

    let selection = match &statements[0] {
        sp::Statement::Query(query) => match query.body.as_ref() {
            sp::SetExpr::Select(select) => select.selection.clone(),
            _ => None,
        },
        _ => None,
    };

    match selection {
        Some(expr) => convert_expr(&expr),
        None => Err(DomainError::Syntax(format!("not a filter: {}", input))),
    }
}

fn convert_expr(expr: &sp::Expr) -> DomainResult<Domain> {
    match expr {
        sp::Expr::Nested(inner) => convert_expr(inner),

        sp::Expr::BinaryOp { left, op, right } => match op {
            sp::BinaryOperator::And => Ok(convert_expr(left)?.and(convert_expr(right)?)),
            sp::BinaryOperator::Or => Ok(convert_expr(left)?.or(convert_expr(right)?)),
            _ => convert_comparison(left, op, right),
        },

        sp::Expr::UnaryOp { op: sp::UnaryOperator::Not, expr } => Ok(convert_expr(expr)?.negate()),

        sp::Expr::IsNull(e) => Ok(Domain::clause(field_name(e)?, Operator::Eq, Value::Null)),

        sp::Expr::IsNotNull(e) => Ok(Domain::clause(field_name(e)?, Operator::NotEq, Value::Null)),

        sp::Expr::InList { expr, list, negated } => {
            let field = field_name(expr)?;
            let items = list.iter().map(literal).collect::<DomainResult<Vec<_>>>()?;
            let operator = if *negated { Operator::NotIn } else { Operator::In };
            Ok(Domain::clause(field, operator, Value::Array(items)))
        }

        sp::Expr::Between { expr, low, high, negated } => {
            let field = field_name(expr)?;
            let range = Domain::clause(field.clone(), Operator::GtEq, literal(low)?)
                .and(Domain::clause(field, Operator::LtEq, literal(high)?));
            Ok(if *negated { range.negate() } else { range })
        }

        sp::Expr::Like { expr, pattern, negated, .. } => {
            let operator = if *negated { Operator::NotLike } else { Operator::Like };
            Ok(Domain::clause(field_name(expr)?, operator, string_literal(pattern)?))
        }

        sp::Expr::ILike { expr, pattern, negated, .. } => {
            let operator = if *negated { Operator::NotILike } else { Operator::ILike };
            Ok(Domain::clause(field_name(expr)?, operator, string_literal(pattern)?))
        }

        sp::Expr::Value(v) => match &v.value {
            sp::Value::Boolean(true) => Ok(Domain::All),
            sp::Value::Boolean(false) => Ok(Domain::All.negate()),
            other => Err(DomainError::UnsupportedExpression(format!(
                "literal {} is not a condition",
                other
            ))),
        },

        other => Err(DomainError::UnsupportedExpression(other.to_string())),
    }
}

fn convert_comparison(
    left: &sp::Expr,
    op: &sp::BinaryOperator,
    right: &sp::Expr,
) -> DomainResult<Domain> {
    let operator = match op {
        sp::BinaryOperator::Eq => Operator::Eq,
        sp::BinaryOperator::NotEq => Operator::NotEq,
        sp::BinaryOperator::Lt => Operator::Lt,
        sp::BinaryOperator::LtEq => Operator::LtEq,
        sp::BinaryOperator::Gt => Operator::Gt,
        sp::BinaryOperator::GtEq => Operator::GtEq,
        other => return Err(DomainError::UnknownOperator(other.to_string())),
    };

    // accept both `field op literal` and `literal op field`
    if let Ok(field) = field_name(left) {
        return Ok(Domain::clause(field, operator, literal(right)?));
    }
    let field = field_name(right)?;
    let flipped = operator
        .flipped()
        .ok_or_else(|| DomainError::UnknownOperator(operator.to_string()))?;
    Ok(Domain::clause(field, flipped, literal(left)?))
}

fn field_name(expr: &sp::Expr) -> DomainResult<String> {
    match expr {
        sp::Expr::Identifier(id) => Ok(id.value.clone()),
        sp::Expr::CompoundIdentifier(parts) => Ok(parts
            .iter()
            .map(|p| p.value.as_str())
            .collect::<Vec<_>>()
            .join(".")),
        sp::Expr::Nested(inner) => field_name(inner),
        other => Err(DomainError::UnsupportedExpression(format!(
            "expected a field name, found {}",
            other
        ))),
    }
}

fn literal(expr: &sp::Expr) -> DomainResult<Value> {
    match expr {
        sp::Expr::Value(v) => convert_value(&v.value),
        sp::Expr::Nested(inner) => literal(inner),
        sp::Expr::UnaryOp { op: sp::UnaryOperator::Minus, expr } => match literal(expr)? {
            Value::Number(n) => negate_number(&n),
            other => Err(DomainError::InvalidValue(format!("cannot negate {}", other))),
        },
        other => Err(DomainError::UnsupportedExpression(format!(
            "expected a literal, found {}",
            other
        ))),
    }
}

fn string_literal(expr: &sp::Expr) -> DomainResult<Value> {
    match literal(expr)? {
        Value::String(s) => Ok(Value::String(s)),
        other => Err(DomainError::InvalidValue(format!("expected a string pattern, found {}", other))),
    }
}

fn convert_value(value: &sp::Value) -> DomainResult<Value> {
    match value {
        sp::Value::Null => Ok(Value::Null),
        sp::Value::Boolean(b) => Ok(Value::Bool(*b)),
        sp::Value::Number(s, _) => {
            if let Ok(i) = s.parse::<i64>() {
                Ok(Value::from(i))
            } else if let Ok(u) = s.parse::<u64>() {
                Ok(Value::from(u))
            } else {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| DomainError::InvalidValue(format!("invalid number: {}", s)))
            }
        }
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
            Ok(Value::String(s.clone()))
        }
        other => Err(DomainError::InvalidValue(format!("unsupported literal: {}", other))),
    }
}

fn negate_number(n: &Number) -> DomainResult<Value> {
    if let Some(i) = n.as_i64() {
        return i
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| DomainError::InvalidValue(format!("number out of range: -{}", n)));
    }
    n.as_f64()
        .and_then(|f| Number::from_f64(-f))
        .map(Value::Number)
        .ok_or_else(|| DomainError::InvalidValue(format!("number out of range: -{}", n)))
}
