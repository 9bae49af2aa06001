//! A named collection bound to a database and a lazily resolved schema.

pub mod admin;
pub mod service;

use log::debug;
use serde_json::{Map, Value};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::database::{CursorOptions, Database, DatabaseError, IdSelector, Target};
use crate::manifest::{Manifest, ManifestError};
use crate::schema::{
    DefinitionType, Parser, Schema, SchemaDefinitions, ValidateOptions, ValidationError,
};

pub use admin::CollectionsService;
pub use service::{parse_query, CollectionService};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Schema '{name}' for collection '{collection}' not found")]
    SchemaNotFound { collection: String, name: String },

    #[error("Collection '{0}' needs a manifest to resolve its schema")]
    NoManifest(String),
}

pub type CollectionResult<T> = Result<T, CollectionError>;

/// Where a collection's schema definitions come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaSource {
    Inline(SchemaDefinitions),
    /// The schema of a collection stored in the manifest.
    Manifest(String),
    /// A named schema ref stored in the manifest.
    Ref(String),
}

enum SchemaState {
    Unresolved,
    Ready(Arc<Schema>),
    Failed(String),
}

pub struct Collection {
    name: String,
    database: Arc<dyn Database>,
    manifest: Option<Arc<dyn Manifest>>,
    source: SchemaSource,
    state: RwLock<SchemaState>,
    // single flight for resolution
    resolving: Mutex<()>,
}

impl Collection {
    pub fn new(name: impl Into<String>, database: Arc<dyn Database>, source: SchemaSource) -> Self {
        Self {
            name: name.into(),
            database,
            manifest: None,
            source,
            state: RwLock::new(SchemaState::Unresolved),
            resolving: Mutex::new(()),
        }
    }

    /// Collection with an inline schema.
    pub fn with_schema(
        name: impl Into<String>,
        database: Arc<dyn Database>,
        definitions: SchemaDefinitions,
    ) -> Self {
        Self::new(name, database, SchemaSource::Inline(definitions))
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: Arc<dyn Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    fn ready_schema(&self) -> Option<Arc<Schema>> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            SchemaState::Ready(schema) => Some(Arc::clone(schema)),
            _ => None,
        }
    }

    fn set_state(&self, state: SchemaState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Last resolution failure, if the schema is currently failed.
    pub fn schema_error(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            SchemaState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Forgets the resolved schema; the next request resolves it again.
    pub fn invalidate_schema(&self) {
        debug!("Invalidating schema of '{}'", self.name);
        self.set_state(SchemaState::Unresolved);
    }

    fn parser(&self) -> Parser {
        let database = Arc::clone(&self.database);
        Arc::new(move |value: Value, kind: DefinitionType| database.cast(value, kind))
    }

    fn manifest(&self) -> CollectionResult<&Arc<dyn Manifest>> {
        self.manifest
            .as_ref()
            .ok_or_else(|| CollectionError::NoManifest(self.name.clone()))
    }

    async fn resolve(&self) -> CollectionResult<SchemaDefinitions> {
        let not_found = |name: &str| CollectionError::SchemaNotFound {
            collection: self.name.clone(),
            name: name.to_string(),
        };
        match &self.source {
            SchemaSource::Inline(definitions) => Ok(definitions.clone()),
            SchemaSource::Manifest(name) => self
                .manifest()?
                .collection(name)
                .await?
                .map(|config| config.schema)
                .ok_or_else(|| not_found(name)),
            SchemaSource::Ref(name) => self
                .manifest()?
                .get_schema_ref(name)
                .await?
                .map(|schema_ref| schema_ref.schema)
                .ok_or_else(|| not_found(name)),
        }
    }

    /// The resolved schema. Resolution runs at most once at a time; a failed
    /// resolution is retried by the next caller.
    pub async fn schema(&self) -> CollectionResult<Arc<Schema>> {
        if let Some(schema) = self.ready_schema() {
            return Ok(schema);
        }

        let _guard = self.resolving.lock().await;
        if let Some(schema) = self.ready_schema() {
            return Ok(schema);
        }

        match self.resolve().await {
            Ok(definitions) => {
                let schema = Arc::new(Schema::new(definitions).with_parser(self.parser()));
                self.set_state(SchemaState::Ready(Arc::clone(&schema)));
                debug!("Resolved schema of '{}'", self.name);
                Ok(schema)
            }
            Err(e) => {
                self.set_state(SchemaState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Validates and inserts one document or an array of documents.
    pub async fn create(&self, data: &Value, options: &CursorOptions) -> CollectionResult<Value> {
        let schema = self.schema().await?;
        let validated = match data {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| schema.validate_value(item, ValidateOptions::create()))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            other => schema.validate_value(other, ValidateOptions::create())?,
        };

        Ok(self
            .database
            .create(&self.name, validated)?
            .with_options(options)
            .exec()
            .await?)
    }

    pub async fn find(
        &self,
        query: &Map<String, Value>,
        options: &CursorOptions,
    ) -> CollectionResult<Value> {
        let schema = self.schema().await?;
        Ok(self
            .database
            .find(&self.name, schema.cast_query(query))
            .with_options(options)
            .exec()
            .await?)
    }

    /// Documents by id, further narrowed by `query`.
    pub async fn get(
        &self,
        ids: IdSelector,
        query: &Map<String, Value>,
        options: &CursorOptions,
    ) -> CollectionResult<Value> {
        let schema = self.schema().await?;
        let ids = ids.map(|id| schema.cast(id, DefinitionType::Id));
        let mut filter = schema.cast_query(query);
        filter.extend(ids.to_query());

        let cursor = match ids.target() {
            Target::One => self.database.find_one(&self.name, filter),
            Target::Many => self.database.find(&self.name, filter),
        };
        Ok(cursor.with_options(options).exec().await?)
    }

    /// Validates a partial document and merges it into the selected ones.
    /// Yields `null` when a single id matched nothing.
    pub async fn patch(
        &self,
        ids: IdSelector,
        data: &Value,
        options: &CursorOptions,
    ) -> CollectionResult<Value> {
        let schema = self.schema().await?;
        let validated = match data {
            Value::Object(map) => schema.validate(map, ValidateOptions::patch())?,
            _ => return Err(ValidationError::new("", "must be an object").into()),
        };
        let ids = ids.map(|id| schema.cast(id, DefinitionType::Id));

        Ok(self
            .database
            .patch(&self.name, ids, validated)
            .with_options(options)
            .exec()
            .await?)
    }

    /// Deletes the selected documents, returning them, or `null` when none
    /// existed.
    pub async fn remove(&self, ids: IdSelector, options: &CursorOptions) -> CollectionResult<Value> {
        let removed = self.get(ids.clone(), &Map::new(), options).await?;
        let nothing = match &removed {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if nothing {
            return Ok(Value::Null);
        }

        let schema = self.schema().await?;
        let ids = ids.map(|id| schema.cast(id, DefinitionType::Id));
        self.database.remove(&self.name, &ids).await?;
        Ok(removed)
    }

    pub async fn count(&self, query: &Map<String, Value>) -> CollectionResult<u64> {
        let schema = self.schema().await?;
        Ok(self.database.count(&self.name, &schema.cast_query(query)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SledDatabase;
    use crate::manifest::{CollectionConfig, SchemaRef, SledManifest};
    use crate::schema::Definition;
    use serde_json::json;

    fn database() -> Arc<dyn Database> {
        Arc::new(SledDatabase::temporary().unwrap())
    }

    fn post_schema() -> SchemaDefinitions {
        let mut definitions = SchemaDefinitions::new();
        definitions.insert("title".to_string(), Definition::string().required());
        definitions.insert("views".to_string(), Definition::number().with_default(json!(0)));
        definitions
    }

    fn query(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_and_defaults() {
        let posts = Collection::with_schema("posts", database(), post_schema());
        let created = posts
            .create(&json!({ "title": "Hello" }), &CursorOptions::default())
            .await
            .unwrap();
        assert_eq!(created["views"], 0);

        let err = posts.create(&json!({}), &CursorOptions::default()).await.unwrap_err();
        match err {
            CollectionError::Validation(e) => {
                assert_eq!(e.field, "title");
                assert_eq!(e.detail, "required field has missing/empty value");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_batch_create_and_many_ids() {
        let posts = Collection::with_schema("posts", database(), post_schema());
        let options = CursorOptions::default();

        // one invalid item rejects the whole batch
        let err = posts
            .create(&json!([{ "_id": "x", "title": "ok" }, { "views": 1 }]), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::Validation(ref e) if e.field == "title"));
        assert_eq!(posts.count(&Map::new()).await.unwrap(), 0);

        let created = posts
            .create(
                &json!([{ "_id": "a", "title": "A" }, { "_id": "b", "title": "B" }, { "_id": "c", "title": "C" }]),
                &options,
            )
            .await
            .unwrap();
        assert_eq!(created.as_array().unwrap().len(), 3);
        assert_eq!(created[1]["views"], 0);

        let ids = IdSelector::from(vec!["a".to_string(), "c".to_string()]);
        let found = posts.get(ids.clone(), &Map::new(), &options).await.unwrap();
        assert_eq!(found.as_array().unwrap().len(), 2);

        let patched = posts.patch(ids.clone(), &json!({ "views": 5 }), &options).await.unwrap();
        assert_eq!(patched.as_array().unwrap().len(), 2);
        assert_eq!(posts.count(&query(json!({ "views": 5 }))).await.unwrap(), 2);

        let err = posts.patch(ids.clone(), &json!({ "views": "many" }), &options).await.unwrap_err();
        assert!(matches!(err, CollectionError::Validation(ref e) if e.field == "views"));

        let removed = posts.remove(ids.clone(), &options).await.unwrap();
        assert_eq!(removed.as_array().unwrap().len(), 2);
        assert_eq!(posts.count(&Map::new()).await.unwrap(), 1);
        assert!(posts.remove(ids, &options).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_find_casts_query() {
        let posts = Collection::with_schema("posts", database(), post_schema());
        let options = CursorOptions::default();
        posts.create(&json!({ "title": "a", "views": 5 }), &options).await.unwrap();
        posts.create(&json!({ "title": "b", "views": 50 }), &options).await.unwrap();

        let found = posts.find(&query(json!({ "views": { "$gte": "10" } })), &options).await.unwrap();
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["title"], "b");
        assert_eq!(posts.count(&query(json!({ "views": "5" }))).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_patch_remove() {
        let posts = Collection::with_schema("posts", database(), post_schema());
        let options = CursorOptions::default();
        let created = posts.create(&json!({ "title": "a" }), &options).await.unwrap();
        let id = created["_id"].as_str().unwrap().to_string();

        let fetched = posts.get(IdSelector::from(id.as_str()), &Map::new(), &options).await.unwrap();
        assert_eq!(fetched["title"], "a");

        let patched = posts
            .patch(IdSelector::from(id.as_str()), &json!({ "views": "7" }), &options)
            .await;
        assert!(matches!(patched, Err(CollectionError::Validation(_))));

        let patched = posts
            .patch(IdSelector::from(id.as_str()), &json!({ "views": 7 }), &options)
            .await
            .unwrap();
        assert_eq!(patched["views"], 7);
        assert_eq!(patched["title"], "a");

        let removed = posts.remove(IdSelector::from(id.as_str()), &options).await.unwrap();
        assert_eq!(removed["_id"], id.as_str());
        let again = posts.remove(IdSelector::from(id.as_str()), &options).await.unwrap();
        assert!(again.is_null());
    }

    #[tokio::test]
    async fn test_manifest_schema_resolution_and_invalidation() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let manifest: Arc<dyn Manifest> = Arc::new(SledManifest::new(&db).unwrap());
        let posts = Collection::new("posts", database(), SchemaSource::Manifest("posts".to_string()))
            .with_manifest(Arc::clone(&manifest));

        assert!(matches!(
            posts.schema().await,
            Err(CollectionError::SchemaNotFound { .. })
        ));
        assert!(posts.schema_error().is_some());

        manifest
            .set_collection("posts", CollectionConfig::new(post_schema()))
            .await
            .unwrap();
        // failed resolution is retried
        assert!(posts.schema().await.unwrap().definitions().contains_key("title"));

        let mut changed = post_schema();
        changed.insert("body".to_string(), Definition::string());
        manifest.set_collection("posts", CollectionConfig::new(changed)).await.unwrap();
        assert!(!posts.schema().await.unwrap().definitions().contains_key("body"));
        posts.invalidate_schema();
        assert!(posts.schema().await.unwrap().definitions().contains_key("body"));
    }

    #[tokio::test]
    async fn test_ref_source() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let manifest: Arc<dyn Manifest> = Arc::new(SledManifest::new(&db).unwrap());
        manifest
            .set_schema_ref("post", SchemaRef { schema: post_schema() })
            .await
            .unwrap();

        let drafts = Collection::new("drafts", database(), SchemaSource::Ref("post".to_string()))
            .with_manifest(manifest);
        assert_eq!(drafts.schema().await.unwrap().definitions().len(), 2);

        let orphan = Collection::new("orphan", database(), SchemaSource::Ref("post".to_string()));
        assert!(matches!(orphan.schema().await, Err(CollectionError::NoManifest(_))));
    }
}
