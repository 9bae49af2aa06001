//! Persisted registry of collections, named schemas, hook bindings and
//! migration history.

mod sled_manifest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::context::Method;
use crate::database::{IndexSpec, Migration};
use crate::hooks::HookStage;
use crate::schema::SchemaDefinitions;

pub use sled_manifest::SledManifest;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest storage failure: {0}")]
    Storage(#[from] sled::Error),

    #[error("Manifest entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration {0} already exists")]
    DuplicateMigration(u32),
}

pub type ManifestResult<T> = Result<T, ManifestError>;

/// Stored configuration of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    pub schema: SchemaDefinitions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CollectionConfig {
    pub fn new(schema: SchemaDefinitions) -> Self {
        Self {
            schema,
            indexes: Vec::new(),
            description: None,
        }
    }

    /// Declared indexes plus the unique indexes implied by the schema.
    pub fn all_indexes(&self) -> Vec<IndexSpec> {
        let mut indexes = IndexSpec::from_schema(&self.schema);
        for index in &self.indexes {
            indexes.retain(|existing| existing.field != index.field);
            indexes.push(index.clone());
        }
        indexes
    }
}

/// A schema stored under a name so collections can share it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub schema: SchemaDefinitions,
}

/// Attaches a registered hook to one method and stage of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookBinding {
    pub hook_id: String,
    pub method: Method,
    pub stage: HookStage,
    #[serde(default)]
    pub config: Value,
}

#[async_trait]
pub trait Manifest: Send + Sync {
    async fn collection(&self, name: &str) -> ManifestResult<Option<CollectionConfig>>;

    async fn set_collection(&self, name: &str, config: CollectionConfig) -> ManifestResult<()>;

    /// Returns whether a collection was removed.
    async fn remove_collection(&self, name: &str) -> ManifestResult<bool>;

    /// All collections, ordered by name.
    async fn collections(&self) -> ManifestResult<Vec<(String, CollectionConfig)>>;

    async fn get_schema_ref(&self, name: &str) -> ManifestResult<Option<SchemaRef>>;

    async fn set_schema_ref(&self, name: &str, schema_ref: SchemaRef) -> ManifestResult<()>;

    async fn get_hooks(&self, collection: &str) -> ManifestResult<Vec<HookBinding>>;

    async fn set_hooks(&self, collection: &str, hooks: Vec<HookBinding>) -> ManifestResult<()>;

    async fn get_migration(&self, version: u32) -> ManifestResult<Option<Migration>>;

    async fn add_migration(&self, migration: Migration) -> ManifestResult<()>;

    /// Version of the last applied migration, if any.
    async fn get_last_migration_commit(&self) -> ManifestResult<Option<u32>>;

    async fn commit_migration(&self, version: u32) -> ManifestResult<()>;
}
