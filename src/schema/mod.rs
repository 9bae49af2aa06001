//! Schema model, payload validation and query casting.
//!
//! A [`Schema`] wraps an ordered set of field [`Definition`]s and an optional
//! parser that converts validated values into a storage-specific
//! representation. The same schema validates write payloads (strictly) and
//! casts read filters (permissively).

pub mod coerce;
pub mod definition_check;
pub mod error;
pub mod query;
pub mod types;
pub mod validation;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub use error::ValidationError;
pub use types::{Definition, DefinitionType, SchemaDefinitions, ARRAY_ITEM_KEY};

/// Converts a validated value into its storage representation.
pub type Parser = Arc<dyn Fn(Value, DefinitionType) -> Value + Send + Sync>;

/// Options controlling [`Schema::validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Substitute `defaultValue` for absent fields.
    pub use_default: bool,
    /// Skip absent top-level fields entirely (patch semantics).
    pub ignore_missing: bool,
}

impl ValidateOptions {
    /// Options used when creating documents.
    pub fn create() -> Self {
        Self {
            use_default: true,
            ignore_missing: false,
        }
    }

    /// Options used when patching documents.
    pub fn patch() -> Self {
        Self {
            use_default: false,
            ignore_missing: true,
        }
    }
}

#[derive(Clone)]
pub struct Schema {
    definitions: SchemaDefinitions,
    parser: Option<Parser>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("definitions", &self.definitions)
            .field("parser", &self.parser.is_some())
            .finish()
    }
}

impl Schema {
    pub fn new(definitions: SchemaDefinitions) -> Self {
        Self {
            definitions,
            parser: None,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn definitions(&self) -> &SchemaDefinitions {
        &self.definitions
    }

    pub fn parser(&self) -> Option<&Parser> {
        self.parser.as_ref()
    }

    /// Nested schema sharing this schema's parser.
    pub(crate) fn nested(&self, definitions: SchemaDefinitions) -> Schema {
        Schema {
            definitions,
            parser: self.parser.clone(),
        }
    }

    /// Runs the parser over a validated value.
    pub fn cast(&self, value: Value, kind: DefinitionType) -> Value {
        match &self.parser {
            Some(parser) => parser(value, kind),
            None => value,
        }
    }

    /// Validates `data`, returning a validated copy.
    pub fn validate(
        &self,
        data: &Map<String, Value>,
        options: ValidateOptions,
    ) -> Result<Map<String, Value>, ValidationError> {
        validation::validate_map(self, data, options, "")
    }

    /// Validates a JSON value that must be an object.
    pub fn validate_value(
        &self,
        data: &Value,
        options: ValidateOptions,
    ) -> Result<Value, ValidationError> {
        match data {
            Value::Object(map) => self.validate(map, options).map(Value::Object),
            _ => Err(ValidationError::new("", "must be an object")),
        }
    }

    /// Casts the leaves of a query filter to the declared field types.
    pub fn cast_query(&self, query: &Map<String, Value>) -> Map<String, Value> {
        query::cast_query(self, query)
    }

    /// Resolves a dot path (`address.city`) to its definition.
    pub fn definition_at_path(&self, path: &str) -> Option<&Definition> {
        query::get_definition_at_path(&self.definitions, path)
    }

    /// Validates a raw, user-supplied schema definition and parses it.
    pub fn validate_schema(
        raw: &Value,
        parent_field: Option<&str>,
    ) -> Result<SchemaDefinitions, ValidationError> {
        definition_check::validate_schema(raw, parent_field)
    }
}
