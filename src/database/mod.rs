//! Storage contract consumed by collections.
//!
//! A [`Database`] executes cursor requests built through [`Cursor`]. Cursors
//! carry the chainable options (`limit`, `skip`, `sort`, `select`,
//! `populate`); population is resolved here, on top of the adapter, so every
//! adapter gets it for free.

pub mod cursor;
pub mod matcher;
pub mod sled_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::schema::{DefinitionType, SchemaDefinitions};

pub use cursor::{Cursor, CursorOptions, CursorRequest, Operation, Populate, SortOrder, Target};
pub use sled_store::SledDatabase;

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duplicate value for unique field '{field}' in '{collection}': {value}")]
    Duplicate {
        collection: String,
        field: String,
        value: String,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

impl From<sled::Error> for DatabaseError {
    fn from(error: sled::Error) -> Self {
        DatabaseError::Storage(error.to_string())
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Storage key for an id value.
pub(crate) fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One id or several; decides whether a cursor yields a document or a list.
#[derive(Debug, Clone, PartialEq)]
pub enum IdSelector {
    One(Value),
    Many(Vec<Value>),
}

impl IdSelector {
    pub fn target(&self) -> Target {
        match self {
            IdSelector::One(_) => Target::One,
            IdSelector::Many(_) => Target::Many,
        }
    }

    /// Filter on [`ID_FIELD`] selecting the ids.
    pub fn to_query(&self) -> Map<String, Value> {
        let condition = match self {
            IdSelector::One(id) => id.clone(),
            IdSelector::Many(ids) => {
                let mut operator = Map::new();
                operator.insert("$in".to_string(), Value::Array(ids.clone()));
                Value::Object(operator)
            }
        };
        let mut query = Map::new();
        query.insert(ID_FIELD.to_string(), condition);
        query
    }

    /// Applies `f` to every id.
    pub fn map(self, f: impl Fn(Value) -> Value) -> IdSelector {
        match self {
            IdSelector::One(id) => IdSelector::One(f(id)),
            IdSelector::Many(ids) => IdSelector::Many(ids.into_iter().map(f).collect()),
        }
    }
}

impl From<&str> for IdSelector {
    fn from(id: &str) -> Self {
        IdSelector::One(Value::String(id.to_string()))
    }
}

impl From<Vec<String>> for IdSelector {
    fn from(ids: Vec<String>) -> Self {
        IdSelector::Many(ids.into_iter().map(Value::String).collect())
    }
}

/// Index over one (possibly dotted) field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: true,
        }
    }

    /// Unique indexes declared by `unique: true` top-level fields.
    pub fn from_schema(definitions: &SchemaDefinitions) -> Vec<IndexSpec> {
        definitions
            .iter()
            .filter(|(_, def)| def.unique)
            .map(|(name, _)| IndexSpec::unique(name.clone()))
            .collect()
    }
}

/// A versioned set of document rewrites applied to one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub version: u32,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub operations: Vec<MigrationOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationOp {
    RenameField { from: String, to: String },
    SetDefault { field: String, value: Value },
    RemoveField { field: String },
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Converts a validated value into the adapter's native representation.
    fn cast(&self, value: Value, _kind: DefinitionType) -> Value {
        value
    }

    /// Runs a cursor request. Single targets yield a document or `null`,
    /// multi targets an array.
    async fn execute(&self, request: CursorRequest) -> DatabaseResult<Value>;

    async fn remove(&self, collection: &str, ids: &IdSelector) -> DatabaseResult<()>;

    async fn count(&self, collection: &str, query: &Map<String, Value>) -> DatabaseResult<u64>;

    /// Adds indexes, replacing existing ones on the same field.
    async fn add_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()>;

    /// Makes `indexes` the exact index set of the collection.
    async fn sync_index(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()>;

    async fn migrate(&self, migration: &Migration) -> DatabaseResult<()>;
}

impl dyn Database {
    pub fn find(&self, collection: &str, query: Map<String, Value>) -> Cursor<'_> {
        Cursor::new(self, collection, Operation::Find { query }, Target::Many)
    }

    pub fn find_one(&self, collection: &str, query: Map<String, Value>) -> Cursor<'_> {
        Cursor::new(self, collection, Operation::Find { query }, Target::One)
    }

    /// `data` is a document (single target) or an array of documents.
    pub fn create(&self, collection: &str, data: Value) -> DatabaseResult<Cursor<'_>> {
        let (documents, target) = match data {
            Value::Object(map) => (vec![map], Target::One),
            Value::Array(items) => {
                let documents = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(map) => Ok(map),
                        _ => Err(DatabaseError::InvalidDocument(
                            "documents must be objects".to_string(),
                        )),
                    })
                    .collect::<DatabaseResult<Vec<_>>>()?;
                (documents, Target::Many)
            }
            _ => {
                return Err(DatabaseError::InvalidDocument(
                    "documents must be objects".to_string(),
                ))
            }
        };
        Ok(Cursor::new(self, collection, Operation::Create { documents }, target))
    }

    pub fn patch(&self, collection: &str, ids: IdSelector, data: Map<String, Value>) -> Cursor<'_> {
        let target = ids.target();
        Cursor::new(self, collection, Operation::Patch { ids, data }, target)
    }
}
