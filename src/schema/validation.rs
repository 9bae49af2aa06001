//! Payload validation.
//!
//! Walks the schema (not the data), so unknown keys pass through untouched.
//! The first failing field aborts the whole call.

use serde_json::{Map, Value};

use super::coerce::normalize_date;
use super::error::join_path;
use super::{Definition, DefinitionType, Schema, SchemaDefinitions, ValidateOptions, ValidationError};

const REQUIRED: &str = "required field";
const REQUIRED_STRING: &str = "required field has missing/empty value";

pub(crate) fn validate_map(
    schema: &Schema,
    data: &Map<String, Value>,
    options: ValidateOptions,
    prefix: &str,
) -> Result<Map<String, Value>, ValidationError> {
    let mut output = data.clone();

    for (field, definition) in schema.definitions() {
        let value = data.get(field);
        if options.ignore_missing && value.is_none() {
            continue;
        }

        let path = join_path(prefix, field);
        match validate_field(schema, definition, value, options, &path)? {
            Some(validated) => {
                output.insert(field.clone(), validated);
            }
            None => {
                output.remove(field);
            }
        }
    }

    Ok(output)
}

/// Validates one field. `Ok(None)` means the field is omitted from the output.
fn validate_field(
    schema: &Schema,
    definition: &Definition,
    value: Option<&Value>,
    options: ValidateOptions,
    path: &str,
) -> Result<Option<Value>, ValidationError> {
    let present = match value {
        None => None,
        Some(Value::String(s)) if s.is_empty() && definition.kind == DefinitionType::String => None,
        Some(v) => Some(v),
    };

    match present {
        Some(value) => validate_present(schema, definition, value, options, path).map(Some),
        None => validate_missing(schema, definition, options, path),
    }
}

fn validate_missing(
    schema: &Schema,
    definition: &Definition,
    options: ValidateOptions,
    path: &str,
) -> Result<Option<Value>, ValidationError> {
    if options.use_default {
        if let Some(default) = &definition.default_value {
            let value = match definition.kind {
                DefinitionType::Date => schema.cast(
                    normalize_date(default)
                        .ok_or_else(|| ValidationError::new(path, "invalid date format"))?,
                    DefinitionType::Date,
                ),
                // structural defaults get their own nested defaults filled in
                DefinitionType::Object | DefinitionType::Array => {
                    validate_present(schema, definition, default, options, path)?
                }
                kind => schema.cast(default.clone(), kind),
            };
            return Ok(Some(value));
        }
    }

    if definition.required {
        let detail = match definition.kind {
            DefinitionType::String => REQUIRED_STRING,
            _ => REQUIRED,
        };
        return Err(ValidationError::new(path, detail));
    }

    Ok(None)
}

fn validate_present(
    schema: &Schema,
    definition: &Definition,
    value: &Value,
    options: ValidateOptions,
    path: &str,
) -> Result<Value, ValidationError> {
    let nested_options = ValidateOptions {
        ignore_missing: false,
        ..options
    };

    let validated = match definition.kind {
        DefinitionType::Any => value.clone(),
        DefinitionType::String | DefinitionType::Id => match value {
            Value::String(_) => value.clone(),
            _ => return Err(ValidationError::new(path, "must be a string")),
        },
        DefinitionType::Number => match value {
            Value::Number(_) => value.clone(),
            _ => return Err(ValidationError::new(path, "must be a number")),
        },
        DefinitionType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            _ => return Err(ValidationError::new(path, "must be a boolean")),
        },
        DefinitionType::Date => match value {
            Value::String(_) | Value::Number(_) => normalize_date(value)
                .ok_or_else(|| ValidationError::new(path, "invalid date format"))?,
            _ => return Err(ValidationError::new(path, "must be a string or number")),
        },
        DefinitionType::Object => match value {
            Value::Object(map) => {
                let nested = schema.nested(definition.schema.clone().unwrap_or_default());
                Value::Object(validate_map(&nested, map, nested_options, path)?)
            }
            _ => return Err(ValidationError::new(path, "must be an object")),
        },
        DefinitionType::Array => match value {
            Value::Array(items) => match definition.item() {
                Some(item) => Value::Array(validate_items(schema, item, items, nested_options, path)?),
                None => value.clone(),
            },
            _ => return Err(ValidationError::new(path, "must be an array")),
        },
    };

    Ok(schema.cast(validated, definition.kind))
}

/// Each element is validated as the single field of a `{item: ...}` schema,
/// reported under `path.<index>`.
fn validate_items(
    schema: &Schema,
    item: &Definition,
    items: &[Value],
    options: ValidateOptions,
    path: &str,
) -> Result<Vec<Value>, ValidationError> {
    let mut wrapper = SchemaDefinitions::new();
    wrapper.insert(super::ARRAY_ITEM_KEY.to_string(), item.clone());
    let element_schema = schema.nested(wrapper);

    items
        .iter()
        .enumerate()
        .map(|(index, element)| {
            let element_path = join_path(path, &index.to_string());
            let validated = validate_field(&element_schema, item, Some(element), options, &element_path)?;
            Ok(validated.unwrap_or_else(|| element.clone()))
        })
        .collect()
}
