//! Hooks available in every registry built with
//! [`HooksRegistry::with_builtin`](super::HooksRegistry::with_builtin).

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{CompiledCache, Hook};
use crate::app::App;
use crate::context::{Context, Method};
use crate::error::{BoxError, ServiceError};
use crate::schema::coerce::format_date;
use crate::schema::ValidationError;

pub fn all() -> Vec<Arc<dyn Hook>> {
    vec![
        Arc::new(TimestampsHook),
        Arc::new(PatternHook::default()),
        Arc::new(OmitHook),
    ]
}

/// Objects addressed by a payload or result: the value itself or the
/// elements of an array.
fn objects_mut(value: &mut Value) -> Vec<&mut Map<String, Value>> {
    match value {
        Value::Object(map) => vec![map],
        Value::Array(items) => items.iter_mut().filter_map(Value::as_object_mut).collect(),
        _ => Vec::new(),
    }
}

fn config_str<'a>(config: &'a Value, key: &str) -> Result<&'a str, BoxError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("hook config is missing '{}'", key).into())
}

/// Stamps `createdAt`/`updatedAt` on incoming payloads.
pub struct TimestampsHook;

#[async_trait]
impl Hook for TimestampsHook {
    fn id(&self) -> &str {
        "core.timestamps"
    }

    fn name(&self) -> &str {
        "Timestamps"
    }

    fn description(&self) -> Option<&str> {
        Some("Sets creation and update timestamps on written documents")
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "createdField": { "type": "string", "defaultValue": "createdAt" },
            "updatedField": { "type": "string", "defaultValue": "updatedAt" }
        }))
    }

    async fn run(&self, ctx: &mut Context, config: &Value, _app: &App) -> Result<(), BoxError> {
        let stamp_created = match ctx.method {
            Method::Create => true,
            Method::Patch => false,
            _ => return Ok(()),
        };
        let created = config_str(config, "createdField")?;
        let updated = config_str(config, "updatedField")?;
        let now = format_date(&Utc::now());

        if let Some(data) = ctx.data.as_mut() {
            for document in objects_mut(data) {
                if stamp_created {
                    document.insert(created.to_string(), now.clone());
                }
                document.insert(updated.to_string(), now.clone());
            }
        }
        Ok(())
    }
}

/// Rejects payloads whose string field does not match a pattern.
#[derive(Default)]
pub struct PatternHook {
    compiled: CompiledCache<Regex>,
}

impl PatternHook {
    fn regex(&self, config: &Value) -> Result<Arc<Regex>, BoxError> {
        self.compiled.get_or_try_compile(config, |c| {
            Regex::new(config_str(c, "pattern")?).map_err(BoxError::from)
        })
    }
}

#[async_trait]
impl Hook for PatternHook {
    fn id(&self) -> &str {
        "core.pattern"
    }

    fn name(&self) -> &str {
        "Pattern"
    }

    fn description(&self) -> Option<&str> {
        Some("Validates a string field against a regular expression")
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "field": { "type": "string", "required": true },
            "pattern": { "type": "string", "required": true },
            "message": { "type": "string", "defaultValue": "Field does not match the required pattern" }
        }))
    }

    fn check_config(&self, config: &Value) -> Result<(), ValidationError> {
        self.regex(config)
            .map(|_| ())
            .map_err(|e| ValidationError::new("pattern", e.to_string()))
    }

    async fn run(&self, ctx: &mut Context, config: &Value, _app: &App) -> Result<(), BoxError> {
        let field = config_str(config, "field")?;
        let regex = self.regex(config)?;

        let data = match ctx.data.as_mut() {
            Some(data) => data,
            None => return Ok(()),
        };
        for document in objects_mut(data) {
            if let Some(Value::String(value)) = document.get(field) {
                if !regex.is_match(value) {
                    let message = config_str(config, "message")?;
                    return Err(ServiceError::bad_request(message)
                        .with_data(json!({ "field": field }))
                        .into());
                }
            }
        }
        Ok(())
    }
}

/// Strips fields from results before they leave the service.
pub struct OmitHook;

#[async_trait]
impl Hook for OmitHook {
    fn id(&self) -> &str {
        "core.omit"
    }

    fn name(&self) -> &str {
        "Omit"
    }

    fn config_schema(&self) -> Option<Value> {
        Some(json!({
            "fields": {
                "type": "array",
                "required": true,
                "schema": { "item": { "type": "string" } }
            }
        }))
    }

    async fn run(&self, ctx: &mut Context, config: &Value, _app: &App) -> Result<(), BoxError> {
        let fields: Vec<&str> = config
            .get("fields")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if let Some(result) = ctx.result.as_mut() {
            for document in objects_mut(result) {
                for field in &fields {
                    document.remove(*field);
                }
            }
        }
        Ok(())
    }
}
