//! Administrative service managing collections at runtime.
//!
//! Request bodies:
//!
//! ```json
//! { "name": "posts", "schema": { "title": { "type": "string" } },
//!   "indexes": [{ "field": "slug", "unique": true }],
//!   "hooks": [{ "hookId": "core.timestamps", "method": "create", "stage": "before" }] }
//! ```
//!
//! `patch` accepts the same fields minus `name`, all optional.

use async_trait::async_trait;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::app::{join_path, App, Routes, Service};
use crate::context::{Context, Method};
use crate::database::IndexSpec;
use crate::error::{BoxError, ServiceError};
use crate::manifest::{CollectionConfig, HookBinding};
use crate::schema::{Schema, SchemaDefinitions};

/// Collection names start with a letter, followed by letters, digits, `_`
/// or `-`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    }
}

fn field<T: DeserializeOwned>(data: &Value, key: &str) -> Result<Option<T>, ServiceError> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ServiceError::bad_request(format!("Invalid '{}': {}", key, e))),
    }
}

fn parse_schema(data: &Value) -> Result<Option<SchemaDefinitions>, ServiceError> {
    match data.get("schema") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => Ok(Some(Schema::validate_schema(raw, None)?)),
    }
}

fn check_hooks(app: &App, hooks: &[HookBinding]) -> Result<(), ServiceError> {
    for binding in hooks {
        app.hooks()
            .get(&binding.hook_id)
            .and_then(|registered| registered.prepare_config(&binding.config))
            .map_err(|e| ServiceError::bad_request(e.to_string()))?;
    }
    Ok(())
}

fn view(name: &str, config: &CollectionConfig, hooks: &[HookBinding]) -> Result<Value, BoxError> {
    let mut value = serde_json::to_value(config)?;
    if let Value::Object(map) = &mut value {
        map.insert("name".to_string(), json!(name));
        map.insert("hooks".to_string(), serde_json::to_value(hooks)?);
    }
    Ok(value)
}

#[derive(Debug, Default)]
pub struct CollectionsService;

impl CollectionsService {
    pub fn new() -> Self {
        Self
    }

    async fn create(&self, data: &Value, app: &App) -> Result<Value, BoxError> {
        let name = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::bad_request("Collection name is required"))?;
        if !is_valid_name(name) {
            return Err(ServiceError::bad_request(format!("Invalid collection name '{}'", name)).into());
        }
        let schema = parse_schema(data)?
            .ok_or_else(|| ServiceError::bad_request("Collection schema is required"))?;
        let hooks: Vec<HookBinding> = field(data, "hooks")?.unwrap_or_default();
        check_hooks(app, &hooks)?;

        let mut config = CollectionConfig::new(schema);
        config.indexes = field::<Vec<IndexSpec>>(data, "indexes")?.unwrap_or_default();
        config.description = field(data, "description")?;

        let _guard = app.lock_admin().await;
        if app.manifest().collection(name).await?.is_some() {
            return Err(ServiceError::conflict(format!("Collection '{}' already exists", name)).into());
        }
        if app.is_mounted(&join_path("/", name)) {
            return Err(ServiceError::conflict(format!("Path '/{}' is already in use", name)).into());
        }

        app.manifest().set_collection(name, config.clone()).await?;
        let stored = async {
            app.manifest().set_hooks(name, hooks.clone()).await?;
            app.database().sync_index(name, &config.all_indexes()).await?;
            Ok::<(), BoxError>(())
        }
        .await;
        if let Err(e) = stored {
            warn!("Rolling back collection '{}': {}", name, e);
            app.manifest().remove_collection(name).await?;
            return Err(e);
        }
        if let Err(e) = app.mount_collection(name).await {
            app.manifest().remove_collection(name).await?;
            return Err(ServiceError::from(e).into());
        }

        info!("Created collection '{}'", name);
        view(name, &config, &hooks)
    }

    async fn patch(&self, name: &str, data: &Value, app: &App) -> Result<Value, BoxError> {
        let schema = parse_schema(data)?;
        let indexes: Option<Vec<IndexSpec>> = field(data, "indexes")?;
        let description: Option<String> = field(data, "description")?;
        let hooks: Option<Vec<HookBinding>> = field(data, "hooks")?;
        if let Some(hooks) = &hooks {
            check_hooks(app, hooks)?;
        }

        let _guard = app.lock_admin().await;
        let mut config = app
            .manifest()
            .collection(name)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Collection '{}' not found", name)))?;
        if let Some(schema) = schema {
            config.schema = schema;
        }
        if let Some(indexes) = indexes {
            config.indexes = indexes;
        }
        if description.is_some() {
            config.description = description;
        }

        app.manifest().set_collection(name, config.clone()).await?;
        app.database().sync_index(name, &config.all_indexes()).await?;

        match (&hooks, app.collection(name)) {
            (None, Some(collection)) => collection.invalidate_schema(),
            (Some(hooks), _) => {
                app.manifest().set_hooks(name, hooks.clone()).await?;
                app.unmount_collection(name);
                app.mount_collection(name).await.map_err(ServiceError::from)?;
            }
            (None, None) => {
                app.mount_collection(name).await.map_err(ServiceError::from)?;
            }
        }

        info!("Updated collection '{}'", name);
        let hooks = app.manifest().get_hooks(name).await?;
        view(name, &config, &hooks)
    }

    async fn remove(&self, name: &str, app: &App) -> Result<Value, BoxError> {
        let _guard = app.lock_admin().await;
        let config = app
            .manifest()
            .collection(name)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Collection '{}' not found", name)))?;
        let hooks = app.manifest().get_hooks(name).await?;

        app.manifest().remove_collection(name).await?;
        app.unmount_collection(name);
        info!("Removed collection '{}'", name);
        view(name, &config, &hooks)
    }
}

#[async_trait]
impl Service for CollectionsService {
    async fn handle(&self, ctx: &mut Context, app: &App) -> Result<(), BoxError> {
        let data = ctx.data.clone().unwrap_or(Value::Null);
        let name = ctx.param("id").map(str::to_string);

        let result = match (ctx.method, name) {
            (Method::Create, None) => self.create(&data, app).await?,
            (Method::Find, None) => {
                let mut collections = Vec::new();
                for (name, config) in app.manifest().collections().await? {
                    let hooks = app.manifest().get_hooks(&name).await?;
                    collections.push(view(&name, &config, &hooks)?);
                }
                Value::Array(collections)
            }
            (Method::Get, Some(name)) => match app.manifest().collection(&name).await? {
                Some(config) => {
                    let hooks = app.manifest().get_hooks(&name).await?;
                    view(&name, &config, &hooks)?
                }
                None => Value::Null,
            },
            (Method::Patch, Some(name)) => self.patch(&name, &data, app).await?,
            (Method::Remove, Some(name)) => self.remove(&name, app).await?,
            (method, Some(_)) => {
                return Err(ServiceError::method_not_allowed(format!(
                    "Method '{}' does not accept an id",
                    method
                ))
                .into())
            }
            (method, None) => {
                return Err(ServiceError::method_not_allowed(format!(
                    "Method '{}' requires an id",
                    method
                ))
                .into())
            }
        };

        ctx.result = Some(result);
        Ok(())
    }

    fn register(&self, routes: &mut Routes) {
        routes.install("").install(":id");
    }
}
