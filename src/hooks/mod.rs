//! Named, configurable functions run around a service handler.

pub mod builtin;
pub mod cache;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::app::App;
use crate::context::Context;
use crate::error::{BoxError, SetupError, SetupResult};
use crate::schema::{Schema, ValidateOptions, ValidationError};

pub use cache::CompiledCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookStage {
    Before,
    After,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::Before => f.write_str("before"),
            HookStage::After => f.write_str("after"),
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    /// Globally unique identifier, e.g. `core.timestamps`.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Raw schema definitions describing the hook's config.
    fn config_schema(&self) -> Option<Value> {
        None
    }

    /// Checks a config beyond what the config schema expresses. Runs when a
    /// binding is made, after defaults are filled in.
    fn check_config(&self, _config: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Runs against the request context. Setting `ctx.result` in a before
    /// stage short-circuits the service.
    async fn run(&self, ctx: &mut Context, config: &Value, app: &App) -> Result<(), BoxError>;
}

/// A hook together with its parsed config schema.
#[derive(Clone)]
pub struct RegisteredHook {
    hook: Arc<dyn Hook>,
    config_schema: Option<Arc<Schema>>,
}

impl RegisteredHook {
    pub fn hook(&self) -> &Arc<dyn Hook> {
        &self.hook
    }

    pub fn config_schema(&self) -> Option<&Schema> {
        self.config_schema.as_deref()
    }

    /// Validates a binding's config, filling in defaults.
    pub fn prepare_config(&self, config: &Value) -> SetupResult<Value> {
        let invalid = |source| SetupError::InvalidHookConfig {
            id: self.hook.id().to_string(),
            source,
        };
        let prepared = match &self.config_schema {
            Some(schema) => {
                let raw = match config {
                    Value::Null => Value::Object(Default::default()),
                    other => other.clone(),
                };
                schema
                    .validate_value(&raw, ValidateOptions::create())
                    .map_err(invalid)?
            }
            None => config.clone(),
        };
        self.hook.check_config(&prepared).map_err(invalid)?;
        Ok(prepared)
    }
}

/// Flat `id -> hook` registry. Filled during setup, read-only afterwards.
#[derive(Default, Clone)]
pub struct HooksRegistry {
    hooks: HashMap<String, RegisteredHook>,
}

impl HooksRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the `core.*` hooks.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for hook in builtin::all() {
            // built-in ids are distinct and their config schemas are static
            if let Err(e) = registry.register_arc(hook) {
                log::error!("Failed to register built-in hook: {}", e);
            }
        }
        registry
    }

    pub fn register<H: Hook + 'static>(&mut self, hook: H) -> SetupResult<()> {
        self.register_arc(Arc::new(hook))
    }

    pub fn register_arc(&mut self, hook: Arc<dyn Hook>) -> SetupResult<()> {
        let id = hook.id().to_string();
        if self.hooks.contains_key(&id) {
            return Err(SetupError::DuplicateHook(id));
        }

        let config_schema = match hook.config_schema() {
            Some(raw) => {
                let definitions = Schema::validate_schema(&raw, None).map_err(|source| {
                    SetupError::InvalidHookSchema {
                        id: id.clone(),
                        source,
                    }
                })?;
                Some(Arc::new(Schema::new(definitions)))
            }
            None => None,
        };

        debug!("Registered hook '{}'", id);
        self.hooks.insert(id, RegisteredHook { hook, config_schema });
        Ok(())
    }

    pub fn get(&self, id: &str) -> SetupResult<&RegisteredHook> {
        self.hooks
            .get(id)
            .ok_or_else(|| SetupError::HookNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hooks.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.hooks.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
