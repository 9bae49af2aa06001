//! Reference [`Database`] adapter backed by sled.
//!
//! Each collection lives in its own tree, documents are stored as JSON keyed
//! by `_id`. Queries are full scans filtered in memory.

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::matcher::{self, resolve_path, values_equal};
use super::{
    id_key, CursorOptions, CursorRequest, Database, DatabaseError, DatabaseResult, IdSelector,
    IndexSpec, Migration, MigrationOp, Operation, Target, ID_FIELD,
};

const COLLECTION_TREE_PREFIX: &str = "collection:";
const INDEX_TREE: &str = "indexes";

#[derive(Clone)]
pub struct SledDatabase {
    db: sled::Db,
    indexes_tree: sled::Tree,
    /// Serializes check-then-write sequences (unique checks, migrations).
    write_lock: Arc<Mutex<()>>,
}

impl SledDatabase {
    /// Wraps an open sled instance. The instance may be shared with a
    /// [`SledManifest`](crate::manifest::SledManifest); tree names do not collide.
    pub fn new(db: sled::Db) -> DatabaseResult<Self> {
        let indexes_tree = db.open_tree(INDEX_TREE)?;
        Ok(Self {
            db,
            indexes_tree,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::new(sled::open(path)?)
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> DatabaseResult<Self> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    fn tree(&self, collection: &str) -> DatabaseResult<sled::Tree> {
        Ok(self
            .db
            .open_tree(format!("{}{}", COLLECTION_TREE_PREFIX, collection))?)
    }

    fn load_all(&self, tree: &sled::Tree) -> DatabaseResult<Vec<Value>> {
        tree.iter()
            .values()
            .map(|bytes| -> DatabaseResult<Value> { Ok(serde_json::from_slice(&bytes?)?) })
            .collect()
    }

    fn find_documents(
        &self,
        tree: &sled::Tree,
        query: &Map<String, Value>,
    ) -> DatabaseResult<Vec<Value>> {
        let mut found = Vec::new();
        for document in self.load_all(tree)? {
            if matcher::matches(&document, query)? {
                found.push(document);
            }
        }
        Ok(found)
    }

    /// Writes every document in one atomic batch.
    fn write_all(&self, tree: &sled::Tree, documents: &[Value]) -> DatabaseResult<()> {
        let mut batch = sled::Batch::default();
        for document in documents {
            batch.insert(document_key(document)?.as_bytes(), serde_json::to_vec(document)?);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn indexes_for(&self, collection: &str) -> DatabaseResult<Vec<IndexSpec>> {
        match self.indexes_tree.get(collection.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn store_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()> {
        self.indexes_tree
            .insert(collection.as_bytes(), serde_json::to_vec(indexes)?)?;
        self.indexes_tree.flush()?;
        Ok(())
    }

    /// Fails when `document` shares a unique field value with another document.
    fn check_unique(
        &self,
        collection: &str,
        indexes: &[IndexSpec],
        existing: &[Value],
        document: &Value,
    ) -> DatabaseResult<()> {
        let own_id = document.get(ID_FIELD);
        for index in indexes.iter().filter(|i| i.unique) {
            let value = match resolve_path(document, &index.field).first() {
                Some(v) if !v.is_null() => (*v).clone(),
                _ => continue,
            };
            let clash = existing.iter().any(|other| {
                other.get(ID_FIELD) != own_id
                    && resolve_path(other, &index.field)
                        .first()
                        .is_some_and(|v| values_equal(v, &value))
            });
            if clash {
                return Err(DatabaseError::Duplicate {
                    collection: collection.to_string(),
                    field: index.field.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks the whole batch before writing any of it.
    fn insert_documents(
        &self,
        collection: &str,
        tree: &sled::Tree,
        documents: Vec<Map<String, Value>>,
    ) -> DatabaseResult<Vec<Value>> {
        let indexes = self.indexes_for(collection)?;
        let mut existing = self.load_all(tree)?;
        let mut keys = HashSet::new();
        let mut created = Vec::with_capacity(documents.len());

        for mut document in documents {
            let key = match document.get(ID_FIELD) {
                Some(Value::Null) | None => {
                    let id = Uuid::new_v4().to_string();
                    document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    id
                }
                Some(id) => id_key(id),
            };
            if tree.contains_key(key.as_bytes())? || !keys.insert(key.clone()) {
                return Err(DatabaseError::Duplicate {
                    collection: collection.to_string(),
                    field: ID_FIELD.to_string(),
                    value: key,
                });
            }

            let document = Value::Object(document);
            self.check_unique(collection, &indexes, &existing, &document)?;
            existing.push(document.clone());
            created.push(document);
        }

        self.write_all(tree, &created)?;
        Ok(created)
    }

    /// Merges `data` into the selected documents. Each patched document is
    /// checked against the others as already patched; nothing is written
    /// unless all of them pass.
    fn patch_documents(
        &self,
        collection: &str,
        tree: &sled::Tree,
        ids: &IdSelector,
        data: Map<String, Value>,
    ) -> DatabaseResult<Vec<Value>> {
        let indexes = self.indexes_for(collection)?;
        let mut working = self.load_all(tree)?;
        let query = ids.to_query();
        let mut patched = Vec::new();

        for position in 0..working.len() {
            if !matcher::matches(&working[position], &query)? {
                continue;
            }
            let mut document = working[position].clone();
            if let Value::Object(fields) = &mut document {
                for (key, value) in &data {
                    if key != ID_FIELD {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
            self.check_unique(collection, &indexes, &working, &document)?;
            working[position] = document.clone();
            patched.push(document);
        }

        self.write_all(tree, &patched)?;
        Ok(patched)
    }
}

fn document_key(document: &Value) -> DatabaseResult<String> {
    document
        .get(ID_FIELD)
        .map(id_key)
        .ok_or_else(|| DatabaseError::InvalidDocument("document has no _id".to_string()))
}

/// Applies sort, skip, limit and projection, then picks the target shape.
fn shape(mut documents: Vec<Value>, target: Target, options: &CursorOptions) -> Value {
    matcher::sort_documents(&mut documents, &options.sort);

    let skip = options.skip.unwrap_or(0) as usize;
    // a zero limit means no limit
    let limit = match options.limit {
        Some(0) | None => usize::MAX,
        Some(limit) => limit as usize,
    };
    let page = documents.into_iter().skip(skip).take(limit).map(|doc| match &options.select {
        Some(fields) => matcher::project(&doc, fields),
        None => doc,
    });

    match target {
        Target::One => page.into_iter().next().unwrap_or(Value::Null),
        Target::Many => Value::Array(page.collect()),
    }
}

fn apply_operation(document: &mut Map<String, Value>, operation: &MigrationOp) {
    match operation {
        MigrationOp::RenameField { from, to } => {
            if let Some(value) = document.remove(from) {
                document.insert(to.clone(), value);
            }
        }
        MigrationOp::SetDefault { field, value } => {
            if document.get(field).map_or(true, Value::is_null) {
                document.insert(field.clone(), value.clone());
            }
        }
        MigrationOp::RemoveField { field } => {
            document.remove(field);
        }
    }
}

#[async_trait]
impl Database for SledDatabase {
    async fn execute(&self, request: CursorRequest) -> DatabaseResult<Value> {
        let CursorRequest {
            collection,
            operation,
            target,
            options,
        } = request;
        let tree = self.tree(&collection)?;

        let documents = match operation {
            Operation::Find { query } => self.find_documents(&tree, &query)?,
            Operation::Create { documents } => {
                debug!("Creating {} document(s) in '{}'", documents.len(), collection);
                let _guard = self.write_lock.lock().await;
                self.insert_documents(&collection, &tree, documents)?
            }
            Operation::Patch { ids, data } => {
                let _guard = self.write_lock.lock().await;
                self.patch_documents(&collection, &tree, &ids, data)?
            }
        };

        Ok(shape(documents, target, &options))
    }

    async fn remove(&self, collection: &str, ids: &IdSelector) -> DatabaseResult<()> {
        let tree = self.tree(collection)?;
        let _guard = self.write_lock.lock().await;
        let mut batch = sled::Batch::default();
        for document in self.find_documents(&tree, &ids.to_query())? {
            if let Some(id) = document.get(ID_FIELD) {
                batch.remove(id_key(id).as_bytes());
            }
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    async fn count(&self, collection: &str, query: &Map<String, Value>) -> DatabaseResult<u64> {
        let tree = self.tree(collection)?;
        Ok(self.find_documents(&tree, query)?.len() as u64)
    }

    async fn add_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut current = self.indexes_for(collection)?;
        for index in indexes {
            current.retain(|existing| existing.field != index.field);
            current.push(index.clone());
        }
        self.store_indexes(collection, &current)
    }

    async fn sync_index(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()> {
        info!("Syncing {} index(es) for '{}'", indexes.len(), collection);
        let _guard = self.write_lock.lock().await;
        self.store_indexes(collection, indexes)
    }

    async fn migrate(&self, migration: &Migration) -> DatabaseResult<()> {
        let tree = self.tree(&migration.collection)?;
        let _guard = self.write_lock.lock().await;
        let mut documents = self.load_all(&tree)?;
        for document in &mut documents {
            if let Value::Object(fields) = document {
                for operation in &migration.operations {
                    apply_operation(fields, operation);
                }
            }
        }
        self.write_all(&tree, &documents)?;
        let rewritten = documents.len();
        info!(
            "Applied migration {} to '{}' ({} document(s))",
            migration.version, migration.collection, rewritten
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SortOrder;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> Arc<dyn Database> {
        Arc::new(SledDatabase::temporary().unwrap())
    }

    fn query(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let db = store();
        let created = db
            .create("users", json!({ "name": "Ada" }))
            .unwrap()
            .exec()
            .await
            .unwrap();
        assert!(created["_id"].is_string());
        assert_eq!(created["name"], "Ada");

        let many = db
            .create("users", json!([{ "name": "Bob" }, { "name": "Cy" }]))
            .unwrap()
            .exec()
            .await
            .unwrap();
        assert_eq!(many.as_array().unwrap().len(), 2);
        assert_eq!(db.count("users", &Map::new()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_with_options() {
        let db = store();
        let docs: Vec<Value> = (1..=5).map(|n| json!({ "_id": format!("u{}", n), "n": n })).collect();
        db.create("nums", Value::Array(docs)).unwrap().exec().await.unwrap();

        let page = db
            .find("nums", query(json!({ "n": { "$gte": 2 } })))
            .sort("n", SortOrder::Descending)
            .skip(1)
            .limit(2)
            .select(vec!["n".to_string()])
            .exec()
            .await
            .unwrap();
        assert_eq!(page, json!([{ "_id": "u4", "n": 4 }, { "_id": "u3", "n": 3 }]));

        let one = db.find_one("nums", query(json!({ "n": 9 }))).exec().await.unwrap();
        assert!(one.is_null());
    }

    #[tokio::test]
    async fn test_patch_and_remove() {
        let db = store();
        db.create("users", json!({ "_id": "a", "name": "Ada", "age": 1 }))
            .unwrap()
            .exec()
            .await
            .unwrap();

        let patched = db
            .patch("users", IdSelector::from("a"), query(json!({ "age": 2, "_id": "z" })))
            .exec()
            .await
            .unwrap();
        assert_eq!(patched, json!({ "_id": "a", "name": "Ada", "age": 2 }));

        let missing = db
            .patch("users", IdSelector::from("nope"), query(json!({ "age": 3 })))
            .exec()
            .await
            .unwrap();
        assert!(missing.is_null());

        db.remove("users", &IdSelector::from("a")).await.unwrap();
        assert_eq!(db.count("users", &Map::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_index_and_duplicate_ids() {
        let db = store();
        db.sync_index("users", &[IndexSpec::unique("email")]).await.unwrap();
        db.create("users", json!({ "_id": "a", "email": "a@x.io" }))
            .unwrap()
            .exec()
            .await
            .unwrap();

        let err = db
            .create("users", json!({ "email": "a@x.io" }))
            .unwrap()
            .exec()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "email"));

        let err = db
            .create("users", json!({ "_id": "a" }))
            .unwrap()
            .exec()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "_id"));

        // patching a document with its own value is fine
        db.patch("users", IdSelector::from("a"), query(json!({ "email": "a@x.io" })))
            .exec()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_batch_create_writes_nothing() {
        let db = store();
        db.sync_index("users", &[IndexSpec::unique("email")]).await.unwrap();

        let err = db
            .create("users", json!([{ "name": "a", "email": "x@x" }, { "name": "b", "email": "x@x" }]))
            .unwrap()
            .exec()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "email"));

        let err = db
            .create("users", json!([{ "_id": "same" }, { "_id": "same" }]))
            .unwrap()
            .exec()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "_id"));

        assert_eq!(db.count("users", &Map::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multi_patch_checks_unique_within_batch() {
        let db = store();
        db.sync_index("users", &[IndexSpec::unique("email")]).await.unwrap();
        db.create("users", json!([{ "_id": "a", "email": "a@x" }, { "_id": "b", "email": "b@x" }]))
            .unwrap()
            .exec()
            .await
            .unwrap();

        let ids = IdSelector::from(vec!["a".to_string(), "b".to_string()]);
        let err = db
            .patch("users", ids.clone(), query(json!({ "email": "same@x" })))
            .exec()
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "email"));
        assert_eq!(db.count("users", &query(json!({ "email": "same@x" }))).await.unwrap(), 0);
        assert_eq!(db.count("users", &query(json!({ "email": "a@x" }))).await.unwrap(), 1);

        // non-unique fields patch both
        let patched = db
            .patch("users", ids.clone(), query(json!({ "role": "admin" })))
            .exec()
            .await
            .unwrap();
        assert_eq!(patched.as_array().unwrap().len(), 2);

        db.remove("users", &ids).await.unwrap();
        assert_eq!(db.count("users", &Map::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_returns_everything() {
        let db = store();
        db.create("nums", json!([{ "n": 1 }, { "n": 2 }, { "n": 3 }]))
            .unwrap()
            .exec()
            .await
            .unwrap();
        let all = db.find("nums", Map::new()).limit(0).exec().await.unwrap();
        assert_eq!(all.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_populate_relations() {
        let db = store();
        db.create("users", json!([{ "_id": "u1", "name": "Ada" }, { "_id": "u2", "name": "Bob" }]))
            .unwrap()
            .exec()
            .await
            .unwrap();
        db.create(
            "posts",
            json!({ "_id": "p1", "author": "u1", "readers": ["u1", "u2", "gone"] }),
        )
        .unwrap()
        .exec()
        .await
        .unwrap();

        let post = db
            .find_one("posts", query(json!({ "_id": "p1" })))
            .populate("author", "users")
            .populate("readers", "users")
            .exec()
            .await
            .unwrap();
        assert_eq!(post["author"]["name"], "Ada");
        assert_eq!(post["readers"][1]["name"], "Bob");
        assert_eq!(post["readers"][2], "gone");
    }

    #[tokio::test]
    async fn test_migrate() {
        let db = store();
        db.create("users", json!([{ "name": "Ada" }, { "name": "Bob", "role": "admin" }]))
            .unwrap()
            .exec()
            .await
            .unwrap();

        db.migrate(&Migration {
            version: 1,
            collection: "users".to_string(),
            description: None,
            operations: vec![
                MigrationOp::RenameField { from: "name".to_string(), to: "fullname".to_string() },
                MigrationOp::SetDefault { field: "role".to_string(), value: json!("member") },
            ],
        })
        .await
        .unwrap();

        let members = db.count("users", &query(json!({ "role": "member" }))).await.unwrap();
        assert_eq!(members, 1);
        let renamed = db.count("users", &query(json!({ "fullname": { "$exists": true } }))).await.unwrap();
        assert_eq!(renamed, 2);
    }
}
