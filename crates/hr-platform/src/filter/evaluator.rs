//! Filter Evaluator
//!
//! A filter tree maps dotted paths to either a literal (implicit `$eq`) or an
//! operator object. All conditions are ANDed. There is no `$or`/`$not`
//! combinator; trees using one fail to parse and therefore never match.
//!
//! Range operators compare numerically, parsing numeric strings. Equality
//! and set membership on body documents are exact apart from `1 == 1.0`.
//! Header values are always strings, so header documents also let a number
//! equal its string form.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{PlatformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl Operator {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "$eq" => Some(Operator::Eq),
            "$ne" => Some(Operator::Ne),
            "$gt" => Some(Operator::Gt),
            "$gte" => Some(Operator::Gte),
            "$lt" => Some(Operator::Lt),
            "$lte" => Some(Operator::Lte),
            "$in" => Some(Operator::In),
            "$nin" => Some(Operator::Nin),
            _ => None,
        }
    }
}

/// How a number meets a string in `$eq`, `$ne`, `$in` and `$nin`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Equality {
    Exact,
    NumericStrings,
}

/// One leaf test: the value at `path` compared to `operand`
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: Vec<String>,
    pub operator: Operator,
    pub operand: Value,
}

impl Condition {
    fn evaluate(&self, document: &Value, equality: Equality) -> bool {
        // Missing keys never match, whatever the operator.
        let Some(actual) = lookup(document, &self.path) else {
            return false;
        };

        match self.operator {
            Operator::Eq => values_equal(actual, &self.operand, equality),
            Operator::Ne => !values_equal(actual, &self.operand, equality),
            Operator::Gt => compare(actual, &self.operand) == Some(Ordering::Greater),
            Operator::Gte => matches!(compare(actual, &self.operand), Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => compare(actual, &self.operand) == Some(Ordering::Less),
            Operator::Lte => matches!(compare(actual, &self.operand), Some(Ordering::Less | Ordering::Equal)),
            Operator::In => member_of(actual, &self.operand, equality),
            Operator::Nin => !member_of(actual, &self.operand, equality),
        }
    }
}

/// Parsed filter. Parse once, evaluate many times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterTree {
    conditions: Vec<Condition>,
}

impl FilterTree {
    /// `null` and `{}` parse to the empty tree, which matches everything.
    pub fn parse(filter: &Value) -> Result<Self> {
        let mut conditions = Vec::new();
        match filter {
            Value::Null => {}
            Value::Object(map) => collect(&[], map, &mut conditions)?,
            other => {
                return Err(PlatformError::invalid_filter(format!(
                    "filter must be an object, got {}",
                    type_name(other)
                )))
            }
        }
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, document: &Value) -> bool {
        self.conditions.iter().all(|c| c.evaluate(document, Equality::Exact))
    }

    /// Match against event headers. The tree's keys must already be lowercase.
    pub fn matches_headers(&self, headers: &HashMap<String, String>) -> bool {
        let document = Value::Object(
            headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
                .collect(),
        );
        self.conditions.iter().all(|c| c.evaluate(&document, Equality::NumericStrings))
    }
}

fn collect(prefix: &[String], map: &Map<String, Value>, out: &mut Vec<Condition>) -> Result<()> {
    for (key, value) in map {
        if key.starts_with('$') {
            return Err(PlatformError::invalid_filter(format!("unsupported combinator {}", key)));
        }
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(PlatformError::invalid_filter(format!("invalid path {:?}", key)));
        }

        let mut path = prefix.to_vec();
        path.extend(key.split('.').map(String::from));

        match value {
            Value::Object(inner) if !inner.is_empty() => {
                let operators = inner.keys().filter(|k| k.starts_with('$')).count();
                if operators == inner.len() {
                    for (op, operand) in inner {
                        let operator = Operator::parse(op)
                            .ok_or_else(|| PlatformError::invalid_filter(format!("unsupported operator {}", op)))?;
                        if matches!(operator, Operator::In | Operator::Nin) && !operand.is_array() {
                            return Err(PlatformError::invalid_filter(format!("{} expects an array", op)));
                        }
                        out.push(Condition { path: path.clone(), operator, operand: operand.clone() });
                    }
                } else if operators == 0 {
                    collect(&path, inner, out)?;
                } else {
                    return Err(PlatformError::invalid_filter(format!(
                        "{} mixes operators and fields",
                        key
                    )));
                }
            }
            literal => out.push(Condition { path, operator: Operator::Eq, operand: literal.clone() }),
        }
    }
    Ok(())
}

fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value, equality: Equality) -> bool {
    if a == b {
        return true;
    }
    let comparable = match equality {
        Equality::Exact => a.is_number() && b.is_number(),
        Equality::NumericStrings => a.is_number() || b.is_number(),
    };
    if !comparable {
        return false;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let x = as_number(a)?;
    let y = as_number(b)?;
    x.partial_cmp(&y)
}

fn member_of(actual: &Value, set: &Value, equality: Equality) -> bool {
    let Value::Array(candidates) = set else {
        return false;
    };
    let contains = |v: &Value| candidates.iter().any(|c| values_equal(v, c, equality));
    match actual {
        Value::Array(items) => items.iter().any(contains),
        single => contains(single),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluate `filter` against `document`. Invalid filters never match.
pub fn matches(filter: &Value, document: &Value) -> bool {
    match FilterTree::parse(filter) {
        Ok(tree) => tree.matches(document),
        Err(e) => {
            warn!(error = %e, "Rejecting document against invalid filter");
            false
        }
    }
}

/// Evaluate a header filter. Header names compare case-insensitively.
pub fn matches_headers(filter: &Value, headers: &HashMap<String, String>) -> bool {
    match FilterTree::parse(&lowercase_keys(filter)) {
        Ok(tree) => tree.matches_headers(headers),
        Err(e) => {
            warn!(error = %e, "Rejecting headers against invalid filter");
            false
        }
    }
}

/// Header names are case-insensitive; filters and documents meet in lowercase
pub(crate) fn lowercase_keys(filter: &Value) -> Value {
    match filter {
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.clone())).collect()),
        other => other.clone(),
    }
}
