//! Condition Evaluation
//!
//! Evaluates the ordered branch rules of a `condition` step against a run's
//! context. The first rule that holds wins.
//!
//! Missing and null fields are treated alike: they are `==` to `null`,
//! `!=` to every other value, and fail every ordering comparison.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use log::warn;
use serde_json::Value;

use super::context::RunContext;
use crate::workflow::model::Condition;

/// Comparison operator of a branch rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gte,
    Lte,
    Gt,
    Lt,
    Eq,
    Ne,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(Operator::Gte),
            "<=" => Ok(Operator::Lte),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        };
        f.write_str(symbol)
    }
}

/// Returns the first condition that holds for `context`.
pub fn first_match<'a>(conditions: &'a [Condition], context: &RunContext) -> Option<&'a Condition> {
    conditions.iter().find(|c| evaluate(c, context))
}

/// Evaluates a single condition.
pub fn evaluate(condition: &Condition, context: &RunContext) -> bool {
    let operator = match condition.operator.parse::<Operator>() {
        Ok(op) => op,
        Err(e) => {
            warn!("Condition on '{}' never matches: {}", condition.field, e);
            return false;
        }
    };

    let user_value;
    let actual = match context.lookup(&condition.field) {
        Some(value) => Some(value),
        None if condition.field == "user_id" => {
            user_value = context.user_value();
            Some(&user_value)
        }
        None => None,
    };

    match actual {
        Some(actual) => compare(actual, operator, &condition.value),
        // An absent field equals only null and orders against nothing
        None => match operator {
            Operator::Eq => condition.value.is_null(),
            Operator::Ne => !condition.value.is_null(),
            _ => false,
        },
    }
}

/// Applies `operator` to two JSON values.
pub fn compare(left: &Value, operator: Operator, right: &Value) -> bool {
    match operator {
        Operator::Eq => loose_eq(left, right),
        Operator::Ne => !loose_eq(left, right),
        Operator::Gte => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => order(left, right) == Some(Ordering::Greater),
        Operator::Lt => order(left, right) == Some(Ordering::Less),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        // Two numeric strings still compare as numbers
        if let (Some(x), Some(y)) = (as_number(left), as_number(right)) {
            return x.partial_cmp(&y);
        }
        return Some(a.cmp(b));
    }
    match (as_number(left), as_number(right)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => None,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (left, right) {
        (Value::String(_), Value::String(_)) => false,
        _ => match (as_number(left), as_number(right)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}
