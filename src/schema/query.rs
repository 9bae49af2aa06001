//! Query casting.
//!
//! Filters are user input, so casting is permissive: a value that cannot be
//! coerced to the declared type is kept as-is and simply will not match.

use serde_json::{Map, Value};

use super::coerce::{coerce_boolean, coerce_number, normalize_date};
use super::{Definition, DefinitionType, Schema, SchemaDefinitions};

/// Logical operators whose operands are nested queries.
const NESTED_QUERY_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Resolves a dot path against a schema tree.
///
/// Descends only through `object` and `array` fields. Numeric segments
/// address array elements; other segments after an array descend into the
/// element schema.
pub fn get_definition_at_path<'a>(
    definitions: &'a SchemaDefinitions,
    path: &str,
) -> Option<&'a Definition> {
    let mut segments = path.split('.');
    let mut current = definitions.get(segments.next()?)?;

    for segment in segments {
        current = match current.kind {
            DefinitionType::Object => current.schema.as_ref()?.get(segment)?,
            DefinitionType::Array => {
                let item = current.item()?;
                if segment.parse::<usize>().is_ok() {
                    item
                } else if item.kind == DefinitionType::Object {
                    item.schema.as_ref()?.get(segment)?
                } else {
                    return None;
                }
            }
            _ => return None,
        };
    }

    Some(current)
}

/// Type used to coerce a filter value for this field. Arrays of primitives
/// are filtered by element.
fn leaf_kind(definition: &Definition) -> Option<DefinitionType> {
    match definition.kind {
        DefinitionType::Object => None,
        DefinitionType::Array => definition
            .item()
            .map(|item| item.kind)
            .filter(|kind| !kind.is_structural()),
        kind => Some(kind),
    }
}

pub(crate) fn cast_query(schema: &Schema, query: &Map<String, Value>) -> Map<String, Value> {
    query
        .iter()
        .map(|(key, value)| {
            if NESTED_QUERY_OPERATORS.contains(&key.as_str()) {
                return (key.clone(), cast_nested_queries(schema, value));
            }

            let cast = match schema.definition_at_path(key).and_then(leaf_kind) {
                Some(kind) => cast_leaf(schema, kind, value),
                None => value.clone(),
            };
            (key.clone(), cast)
        })
        .collect()
}

fn cast_nested_queries(schema: &Schema, value: &Value) -> Value {
    match value {
        Value::Array(queries) => Value::Array(
            queries
                .iter()
                .map(|q| match q {
                    Value::Object(map) => Value::Object(cast_query(schema, map)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn cast_leaf(schema: &Schema, kind: DefinitionType, value: &Value) -> Value {
    match value {
        Value::Object(operators) if operators.keys().any(|k| k.starts_with('$')) => Value::Object(
            operators
                .iter()
                .map(|(op, operand)| {
                    let cast = if op.starts_with('$') {
                        cast_operand(schema, kind, operand)
                    } else {
                        operand.clone()
                    };
                    (op.clone(), cast)
                })
                .collect(),
        ),
        other => cast_operand(schema, kind, other),
    }
}

/// Coerces a single operand, element-wise for arrays.
fn cast_operand(schema: &Schema, kind: DefinitionType, value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| cast_scalar(schema, kind, item))
                .collect(),
        ),
        other => cast_scalar(schema, kind, other),
    }
}

fn cast_scalar(schema: &Schema, kind: DefinitionType, value: &Value) -> Value {
    let coerced = match kind {
        DefinitionType::Boolean => Some(coerce_boolean(value)),
        DefinitionType::Number => coerce_number(value),
        DefinitionType::Date => normalize_date(value),
        DefinitionType::Id => Some(value.clone()),
        _ => return value.clone(),
    };

    match coerced {
        Some(v) => schema.cast(v, kind),
        None => value.clone(),
    }
}
