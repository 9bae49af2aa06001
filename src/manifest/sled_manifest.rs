use async_trait::async_trait;
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tokio::sync::Mutex;

use super::{
    CollectionConfig, HookBinding, Manifest, ManifestError, ManifestResult, SchemaRef,
};
use crate::database::Migration;

const LAST_MIGRATION_KEY: &str = "last_migration";

/// Manifest stored in sled trees next to (or apart from) the documents.
pub struct SledManifest {
    collections_tree: sled::Tree,
    schema_refs_tree: sled::Tree,
    hooks_tree: sled::Tree,
    migrations_tree: sled::Tree,
    meta_tree: sled::Tree,
    /// Serializes writers.
    write_lock: Mutex<()>,
}

impl SledManifest {
    pub fn new(db: &sled::Db) -> ManifestResult<Self> {
        Ok(Self {
            collections_tree: db.open_tree("manifest_collections")?,
            schema_refs_tree: db.open_tree("manifest_schema_refs")?,
            hooks_tree: db.open_tree("manifest_hooks")?,
            migrations_tree: db.open_tree("manifest_migrations")?,
            meta_tree: db.open_tree("manifest_meta")?,
            write_lock: Mutex::new(()),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> ManifestResult<Self> {
        Self::new(&sled::open(path)?)
    }

    fn get_item<T: DeserializeOwned>(tree: &sled::Tree, key: &[u8]) -> ManifestResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_item<T: Serialize>(tree: &sled::Tree, key: &[u8], item: &T) -> ManifestResult<()> {
        tree.insert(key, serde_json::to_vec(item)?)?;
        tree.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Manifest for SledManifest {
    async fn collection(&self, name: &str) -> ManifestResult<Option<CollectionConfig>> {
        Self::get_item(&self.collections_tree, name.as_bytes())
    }

    async fn set_collection(&self, name: &str, config: CollectionConfig) -> ManifestResult<()> {
        let _guard = self.write_lock.lock().await;
        debug!("Storing collection config '{}'", name);
        Self::store_item(&self.collections_tree, name.as_bytes(), &config)
    }

    async fn remove_collection(&self, name: &str) -> ManifestResult<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.collections_tree.remove(name.as_bytes())?.is_some();
        self.hooks_tree.remove(name.as_bytes())?;
        self.collections_tree.flush()?;
        self.hooks_tree.flush()?;
        Ok(removed)
    }

    async fn collections(&self) -> ManifestResult<Vec<(String, CollectionConfig)>> {
        self.collections_tree
            .iter()
            .map(|entry| {
                let (key, bytes) = entry?;
                let name = String::from_utf8_lossy(&key).to_string();
                Ok((name, serde_json::from_slice(&bytes)?))
            })
            .collect()
    }

    async fn get_schema_ref(&self, name: &str) -> ManifestResult<Option<SchemaRef>> {
        Self::get_item(&self.schema_refs_tree, name.as_bytes())
    }

    async fn set_schema_ref(&self, name: &str, schema_ref: SchemaRef) -> ManifestResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::store_item(&self.schema_refs_tree, name.as_bytes(), &schema_ref)
    }

    async fn get_hooks(&self, collection: &str) -> ManifestResult<Vec<HookBinding>> {
        Ok(Self::get_item(&self.hooks_tree, collection.as_bytes())?.unwrap_or_default())
    }

    async fn set_hooks(&self, collection: &str, hooks: Vec<HookBinding>) -> ManifestResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::store_item(&self.hooks_tree, collection.as_bytes(), &hooks)
    }

    async fn get_migration(&self, version: u32) -> ManifestResult<Option<Migration>> {
        Self::get_item(&self.migrations_tree, &version.to_be_bytes())
    }

    async fn add_migration(&self, migration: Migration) -> ManifestResult<()> {
        let _guard = self.write_lock.lock().await;
        let key = migration.version.to_be_bytes();
        if self.migrations_tree.contains_key(key)? {
            return Err(ManifestError::DuplicateMigration(migration.version));
        }
        Self::store_item(&self.migrations_tree, &key, &migration)
    }

    async fn get_last_migration_commit(&self) -> ManifestResult<Option<u32>> {
        Self::get_item(&self.meta_tree, LAST_MIGRATION_KEY.as_bytes())
    }

    async fn commit_migration(&self, version: u32) -> ManifestResult<()> {
        let _guard = self.write_lock.lock().await;
        Self::store_item(&self.meta_tree, LAST_MIGRATION_KEY.as_bytes(), &version)
    }
}
