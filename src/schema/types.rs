use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Ordered mapping of field name to [`Definition`].
///
/// Field order is preserved; validation walks fields in this order so the
/// first failing field is deterministic.
pub type SchemaDefinitions = IndexMap<String, Definition>;

/// Key under which an array definition stores its per-element definition.
pub const ARRAY_ITEM_KEY: &str = "item";

/// Closed set of field types a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionType {
    Any,
    Array,
    Boolean,
    Date,
    Id,
    Number,
    Object,
    String,
}

impl DefinitionType {
    pub const ALL: [DefinitionType; 8] = [
        DefinitionType::Any,
        DefinitionType::Array,
        DefinitionType::Boolean,
        DefinitionType::Date,
        DefinitionType::Id,
        DefinitionType::Number,
        DefinitionType::Object,
        DefinitionType::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionType::Any => "any",
            DefinitionType::Array => "array",
            DefinitionType::Boolean => "boolean",
            DefinitionType::Date => "date",
            DefinitionType::Id => "id",
            DefinitionType::Number => "number",
            DefinitionType::Object => "object",
            DefinitionType::String => "string",
        }
    }

    /// Types that own a nested schema.
    pub fn is_structural(&self) -> bool {
        matches!(self, DefinitionType::Array | DefinitionType::Object)
    }
}

impl fmt::Display for DefinitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefinitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DefinitionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown type '{}'", s))
    }
}

/// One field of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    #[serde(rename = "type")]
    pub kind: DefinitionType,

    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Informational; enforced by storage indexes, not by validation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDefinitions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Definition {
    pub fn new(kind: DefinitionType) -> Self {
        Self {
            kind,
            required: false,
            default_value: None,
            unique: false,
            relation: None,
            schema: None,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(DefinitionType::String)
    }

    pub fn number() -> Self {
        Self::new(DefinitionType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(DefinitionType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(DefinitionType::Date)
    }

    pub fn any() -> Self {
        Self::new(DefinitionType::Any)
    }

    /// Relation to a document of another collection.
    pub fn id(relation: impl Into<String>) -> Self {
        Self::new(DefinitionType::Id).with_relation(relation)
    }

    pub fn object(schema: SchemaDefinitions) -> Self {
        let mut def = Self::new(DefinitionType::Object);
        def.schema = Some(schema);
        def
    }

    /// Array whose elements all follow `item`.
    pub fn array(item: Definition) -> Self {
        let mut nested = SchemaDefinitions::new();
        nested.insert(ARRAY_ITEM_KEY.to_string(), item);
        let mut def = Self::new(DefinitionType::Array);
        def.schema = Some(nested);
        def
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Per-element definition of an array field.
    pub fn item(&self) -> Option<&Definition> {
        match self.kind {
            DefinitionType::Array => self.schema.as_ref()?.get(ARRAY_ITEM_KEY),
            _ => None,
        }
    }

    /// Collection a relation field points at, looking through arrays.
    pub fn relation_target(&self) -> Option<&str> {
        match self.kind {
            DefinitionType::Id => self.relation.as_deref(),
            DefinitionType::Array => {
                let item = self.item()?;
                match item.kind {
                    DefinitionType::Id => item.relation.as_deref(),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_deserializes_from_wire_shape() {
        let def: Definition = serde_json::from_value(json!({
            "type": "array",
            "required": true,
            "schema": { "item": { "type": "id", "relation": "users" } }
        }))
        .unwrap();

        assert_eq!(def.kind, DefinitionType::Array);
        assert!(def.required);
        assert_eq!(def.relation_target(), Some("users"));
    }

    #[test]
    fn test_definition_serializes_compactly() {
        let def = Definition::string().with_default(json!("n/a"));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value, json!({ "type": "string", "defaultValue": "n/a" }));
    }

    #[test]
    fn test_type_from_str() {
        assert_eq!("date".parse::<DefinitionType>().unwrap(), DefinitionType::Date);
        assert!("integer".parse::<DefinitionType>().is_err());
    }

    #[test]
    fn test_relation_target_ignores_plain_fields() {
        assert_eq!(Definition::string().relation_target(), None);
        assert_eq!(Definition::array(Definition::string()).relation_target(), None);
        assert_eq!(Definition::id("posts").relation_target(), Some("posts"));
    }
}
