//! Structural validation of user-supplied schema definitions.

use serde_json::{Map, Value};

use super::error::join_path;
use super::{
    Definition, DefinitionType, Schema, SchemaDefinitions, ValidateOptions, ValidationError,
    ARRAY_ITEM_KEY,
};

/// Validates a raw schema (field name -> definition object) and parses it.
///
/// Errors name the offending field by its dotted path below `parent_field`.
pub fn validate_schema(
    raw: &Value,
    parent_field: Option<&str>,
) -> Result<SchemaDefinitions, ValidationError> {
    let prefix = parent_field.unwrap_or("");
    let fields = raw
        .as_object()
        .ok_or_else(|| ValidationError::new(prefix, "schema must be an object"))?;

    let mut definitions = SchemaDefinitions::new();
    for (name, raw_definition) in fields {
        let definition = check_definition(name, raw_definition, prefix)?;
        definitions.insert(name.clone(), definition);
    }

    Ok(definitions)
}

fn check_definition(name: &str, raw: &Value, prefix: &str) -> Result<Definition, ValidationError> {
    let path = join_path(prefix, name);
    let fields = raw
        .as_object()
        .ok_or_else(|| ValidationError::new(&path, "definition must be an object"))?;

    let kind = match fields.get("type") {
        Some(Value::String(t)) => t
            .parse::<DefinitionType>()
            .map_err(|_| ValidationError::new(&path, format!("invalid type '{}'", t)))?,
        Some(_) => return Err(ValidationError::new(&path, "type must be a string")),
        None => return Err(ValidationError::new(&path, "missing type")),
    };

    for flag in ["required", "unique"] {
        if fields.get(flag).is_some_and(|v| !v.is_boolean()) {
            return Err(ValidationError::new(&path, format!("{} must be a boolean", flag)));
        }
    }
    if fields.get("description").is_some_and(|v| !v.is_string()) {
        return Err(ValidationError::new(&path, "description must be a string"));
    }

    let nested = match kind {
        DefinitionType::Object | DefinitionType::Array => {
            let nested = fields
                .get("schema")
                .filter(|s| s.is_object())
                .ok_or_else(|| ValidationError::new(&path, format!("{} fields require a schema", kind)))?;
            if kind == DefinitionType::Array && nested.get(ARRAY_ITEM_KEY).is_none() {
                return Err(ValidationError::new(
                    &path,
                    "array schema requires an 'item' definition",
                ));
            }
            Some(validate_schema(nested, Some(&path))?)
        }
        _ => None,
    };

    let relation = match fields.get("relation") {
        Some(Value::String(r)) if !r.is_empty() => Some(r.clone()),
        Some(Value::String(_)) | None => None,
        Some(_) => return Err(ValidationError::new(&path, "relation must be a string")),
    };
    if kind == DefinitionType::Id && relation.is_none() {
        return Err(ValidationError::new(&path, "id fields require a relation"));
    }

    let mut definition = Definition::new(kind);
    definition.required = fields.get("required").and_then(Value::as_bool).unwrap_or(false);
    definition.unique = fields.get("unique").and_then(Value::as_bool).unwrap_or(false);
    definition.relation = relation;
    definition.schema = nested;
    definition.description = fields
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(default) = fields.get("defaultValue") {
        check_default(name, prefix, &definition, default)?;
        definition.default_value = Some(default.clone());
    }

    Ok(definition)
}

/// Runs the default through a throwaway single-field schema so structural
/// defaults are checked against their nested definitions.
fn check_default(
    name: &str,
    prefix: &str,
    definition: &Definition,
    default: &Value,
) -> Result<(), ValidationError> {
    if definition.kind == DefinitionType::Any {
        return Ok(());
    }

    let mut wrapper = SchemaDefinitions::new();
    wrapper.insert(name.to_string(), definition.clone());

    let mut data = Map::new();
    data.insert(name.to_string(), default.clone());

    Schema::new(wrapper)
        .validate(&data, ValidateOptions::create())
        .map(|_| ())
        .map_err(|e| {
            ValidationError::new(
                join_path(prefix, &e.field),
                format!("invalid defaultValue: {}", e.detail),
            )
        })
}
