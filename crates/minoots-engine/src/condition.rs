//! Condition evaluation: a list of predicates over `(context, metadata)`.
//!
//! A condition list is satisfied iff every condition matches (AND
//! semantics); an empty list is always satisfied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Comparison/existence operator for a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    NotExists,
}

impl Operator {
    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            _ => return None,
        })
    }
}

/// A single predicate: `lhs <operator> rhs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path resolved against `[context, metadata]`.
    pub lhs: Option<String>,
    /// Literal to compare against, or a dotted path if `rhs_is_path`.
    pub rhs: Option<Value>,
    pub operator: String,
    /// Overrides path resolution for the left side.
    #[serde(default)]
    pub lhs_value: Option<Value>,
    /// Overrides path resolution for the right side.
    #[serde(default)]
    pub rhs_value: Option<Value>,
}

/// Normalizes conditions supplied either as an array of [`Condition`]
/// objects or as a flat key/value map (`{"status": "ready"}` becomes an
/// `equals` condition per key).
pub fn normalize_conditions(value: &Value) -> Result<Vec<Condition>, EngineError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone())
                    .map_err(|e| EngineError::InvalidCondition(e.to_string()))
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| Condition {
                lhs: Some(k.clone()),
                rhs: Some(v.clone()),
                operator: "equals".to_string(),
                lhs_value: None,
                rhs_value: None,
            })
            .collect()),
        other => Err(EngineError::InvalidCondition(format!(
            "conditions must be an array or object, got {other}"
        ))),
    }
}

/// Resolves a dotted path against a lookup stack `[context, metadata]`.
///
/// If the path's first segment names a root in the stack (`"context"` or
/// `"metadata"`), the remainder descends that named root; otherwise the
/// whole path is tried against each root in turn as a flat-key fallback.
fn resolve_path(path: &str, context: &Value, metadata: &Value) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;

    let (root, rest): (&Value, Vec<&str>) = match first {
        "context" => (context, segments.collect()),
        "metadata" => (metadata, segments.collect()),
        _ => {
            if let Some(v) = descend(context, &path.split('.').collect::<Vec<_>>()) {
                return Some(v);
            }
            (metadata, path.split('.').collect())
        }
    };

    descend(root, &rest)
}

fn descend(root: &Value, segments: &[&str]) -> Option<Value> {
    let mut current = root;
    for seg in segments {
        current = current.get(seg)?;
    }
    Some(current.clone())
}

fn resolved_lhs(cond: &Condition, context: &Value, metadata: &Value) -> Option<Value> {
    if let Some(v) = &cond.lhs_value {
        return Some(v.clone());
    }
    cond.lhs
        .as_deref()
        .and_then(|p| resolve_path(p, context, metadata))
}

fn resolved_rhs(cond: &Condition, context: &Value, metadata: &Value) -> Option<Value> {
    if let Some(v) = &cond.rhs_value {
        return Some(v.clone());
    }
    cond.rhs.clone().or_else(|| {
        // Allow rhs to itself be a dotted-path string reference.
        match &cond.rhs {
            Some(Value::String(s)) => resolve_path(s, context, metadata),
            _ => None,
        }
    })
}

/// Natural ordering over JSON scalars: numeric for numbers, lexicographic
/// for strings. Mixed types never compare as equal/ordered.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// Evaluates a single condition against `(context, metadata)`.
fn matches(cond: &Condition, context: &Value, metadata: &Value) -> bool {
    let Some(op) = Operator::from_str(&cond.operator) else {
        return false;
    };

    let lhs = resolved_lhs(cond, context, metadata);

    match op {
        Operator::Exists => lhs.is_some(),
        Operator::NotExists => lhs.is_none(),
        Operator::Equals => {
            let rhs = resolved_rhs(cond, context, metadata);
            match (lhs, rhs) {
                (Some(l), Some(r)) => values_equal(&l, &r),
                _ => false,
            }
        }
        Operator::NotEquals => {
            let rhs = resolved_rhs(cond, context, metadata);
            match (lhs, rhs) {
                (Some(l), Some(r)) => !values_equal(&l, &r),
                _ => true,
            }
        }
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let rhs = resolved_rhs(cond, context, metadata);
            match (lhs, rhs) {
                (Some(l), Some(r)) => match compare(&l, &r) {
                    Some(ord) => match op {
                        Operator::Gt => ord.is_gt(),
                        Operator::Gte => ord.is_ge(),
                        Operator::Lt => ord.is_lt(),
                        Operator::Lte => ord.is_le(),
                        _ => unreachable!(),
                    },
                    None => false,
                },
                _ => false,
            }
        }
    }
}

/// Evaluates a condition list with AND semantics; an empty list always
/// satisfies.
pub fn evaluate(conditions: &[Condition], context: &Value, metadata: &Value) -> bool {
    conditions.iter().all(|c| matches(c, context, metadata))
}
