//! Document filtering and ordering used by the sled adapter.
//!
//! Supports the subset of Mongo query syntax the collection layer emits:
//! equality (with array-contains), dot paths, comparison and set operators,
//! `$exists`, `$regex` and the logical `$and`/`$or`/`$nor`.

use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::{DatabaseError, DatabaseResult, SortOrder};

static NULL: Value = Value::Null;

/// Values found at a dot path. Arrays are traversed; a leaf array yields
/// both itself and its elements.
pub fn resolve_path<'a>(document: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(document, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    match segments.split_first() {
        None => {
            out.push(value);
            if let Value::Array(items) = value {
                out.extend(items.iter());
            }
        }
        Some((head, rest)) => match value {
            Value::Object(map) => {
                if let Some(child) = map.get(*head) {
                    collect(child, rest, out);
                }
            }
            Value::Array(items) => match head.parse::<usize>() {
                Ok(index) => {
                    if let Some(child) = items.get(index) {
                        collect(child, rest, out);
                    }
                }
                Err(_) => {
                    for item in items {
                        collect(item, segments, out);
                    }
                }
            },
            _ => {}
        },
    }
}

pub fn matches(document: &Value, query: &Map<String, Value>) -> DatabaseResult<bool> {
    for (key, condition) in query {
        let matched = match key.as_str() {
            "$and" => all_queries(document, condition, |results| results.iter().all(|r| *r))?,
            "$or" => all_queries(document, condition, |results| results.iter().any(|r| *r))?,
            "$nor" => all_queries(document, condition, |results| !results.iter().any(|r| *r))?,
            op if op.starts_with('$') => {
                return Err(DatabaseError::InvalidQuery(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            path => matches_condition(&resolve_path(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_queries(
    document: &Value,
    condition: &Value,
    combine: impl Fn(&[bool]) -> bool,
) -> DatabaseResult<bool> {
    let queries = condition
        .as_array()
        .ok_or_else(|| DatabaseError::InvalidQuery("logical operators take an array".to_string()))?;
    let results = queries
        .iter()
        .map(|q| match q {
            Value::Object(map) => matches(document, map),
            _ => Err(DatabaseError::InvalidQuery(
                "logical operator operands must be objects".to_string(),
            )),
        })
        .collect::<DatabaseResult<Vec<bool>>>()?;
    Ok(combine(&results))
}

fn is_operator_object(condition: &Value) -> Option<&Map<String, Value>> {
    match condition {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => Some(map),
        _ => None,
    }
}

fn matches_condition(candidates: &[&Value], condition: &Value) -> DatabaseResult<bool> {
    let operators = match is_operator_object(condition) {
        Some(operators) => operators,
        None => return Ok(equals_any(candidates, condition)),
    };

    for (op, operand) in operators {
        let holds = match op.as_str() {
            "$eq" => equals_any(candidates, operand),
            "$ne" => !equals_any(candidates, operand),
            "$gt" => compares_any(candidates, operand, |o| o == Ordering::Greater),
            "$gte" => compares_any(candidates, operand, |o| o != Ordering::Less),
            "$lt" => compares_any(candidates, operand, |o| o == Ordering::Less),
            "$lte" => compares_any(candidates, operand, |o| o != Ordering::Greater),
            "$in" => in_list(candidates, operand)?,
            "$nin" => !in_list(candidates, operand)?,
            "$exists" => {
                let present = candidates.iter().any(|v| !v.is_null());
                present == truthy(operand)
            }
            "$regex" => regex_matches(candidates, operand, operators.get("$options"))?,
            "$options" => true,
            other => {
                return Err(DatabaseError::InvalidQuery(format!(
                    "unsupported operator '{}'",
                    other
                )))
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => s == "true" || s == "1",
        _ => false,
    }
}

/// `null` matches a missing field.
fn equals_any(candidates: &[&Value], expected: &Value) -> bool {
    if candidates.is_empty() {
        return expected.is_null();
    }
    candidates.iter().any(|v| values_equal(v, expected))
}

fn compares_any(candidates: &[&Value], operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates
        .iter()
        .any(|v| compare_values(v, operand).is_some_and(&accept))
}

fn in_list(candidates: &[&Value], operand: &Value) -> DatabaseResult<bool> {
    let list = operand
        .as_array()
        .ok_or_else(|| DatabaseError::InvalidQuery("$in/$nin take an array".to_string()))?;
    Ok(list.iter().any(|expected| equals_any(candidates, expected)))
}

fn regex_matches(
    candidates: &[&Value],
    pattern: &Value,
    options: Option<&Value>,
) -> DatabaseResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DatabaseError::InvalidQuery("$regex takes a string".to_string()))?;
    let case_insensitive = options
        .and_then(Value::as_str)
        .is_some_and(|o| o.contains('i'));
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| DatabaseError::InvalidQuery(format!("invalid $regex: {}", e)))?;
    Ok(candidates
        .iter()
        .filter_map(|v| v.as_str())
        .any(|s| regex.is_match(s)))
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between values of the same kind; `None` across kinds.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order used for sorting: by kind first, then by value.
fn sort_compare(a: &Value, b: &Value) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal))
}

pub fn sort_documents(documents: &mut [Value], sort: &[(String, SortOrder)]) {
    if sort.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for (field, order) in sort {
            let left = resolve_path(a, field).first().copied().unwrap_or(&NULL);
            let right = resolve_path(b, field).first().copied().unwrap_or(&NULL);
            let ordering = match order {
                SortOrder::Ascending => sort_compare(left, right),
                SortOrder::Descending => sort_compare(right, left),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Keeps `_id` and the top-level field of every selected path.
pub fn project(document: &Value, fields: &[String]) -> Value {
    let source = match document {
        Value::Object(map) => map,
        other => return other.clone(),
    };

    let mut projected = Map::new();
    if let Some(id) = source.get(super::ID_FIELD) {
        projected.insert(super::ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        let top = field.split('.').next().unwrap_or(field);
        if let Some(value) = source.get(top) {
            projected.insert(top.to_string(), value.clone());
        }
    }
    Value::Object(projected)
}
