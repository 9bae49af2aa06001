//! Per-route execution chain: before-hooks, service, after-hooks.

use log::{debug, error, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{App, Service};
use crate::context::{Context, Method};
use crate::error::{BoxError, ServiceError, SetupResult};
use crate::hooks::{Hook, HookStage, HooksRegistry};
use crate::manifest::HookBinding;

#[derive(Clone)]
struct HookEntry {
    hook: Arc<dyn Hook>,
    config: Value,
}

pub struct Pipeline {
    service: Arc<dyn Service>,
    hooks: RwLock<HashMap<(Method, HookStage), Vec<HookEntry>>>,
}

impl Pipeline {
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            hooks: RwLock::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    /// Appends a hook to one method and stage. `config` is passed as-is.
    pub fn add_hook(&self, method: Method, stage: HookStage, hook: Arc<dyn Hook>, config: Value) {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        hooks
            .entry((method, stage))
            .or_default()
            .push(HookEntry { hook, config });
    }

    pub fn before(&self, method: Method, hook: Arc<dyn Hook>, config: Value) -> &Self {
        self.add_hook(method, HookStage::Before, hook, config);
        self
    }

    pub fn after(&self, method: Method, hook: Arc<dyn Hook>, config: Value) -> &Self {
        self.add_hook(method, HookStage::After, hook, config);
        self
    }

    /// Resolves a stored binding against the registry, validating its config.
    pub fn bind(&self, registry: &HooksRegistry, binding: &HookBinding) -> SetupResult<()> {
        let registered = registry.get(&binding.hook_id)?;
        let config = registered.prepare_config(&binding.config)?;
        self.add_hook(
            binding.method,
            binding.stage,
            Arc::clone(registered.hook()),
            config,
        );
        Ok(())
    }

    pub fn clear_hooks(&self) {
        self.hooks.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn hook_count(&self, method: Method, stage: HookStage) -> usize {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(method, stage))
            .map_or(0, Vec::len)
    }

    // Snapshot so no lock is held across awaits.
    fn hooks_for(&self, method: Method, stage: HookStage) -> Vec<HookEntry> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(method, stage))
            .cloned()
            .unwrap_or_default()
    }

    /// Runs the chain. Never fails: errors end up in `ctx.result`.
    pub async fn run(&self, mut ctx: Context, app: &App) -> Context {
        let method = ctx.method;

        for entry in self.hooks_for(method, HookStage::Before) {
            debug!("{} {}: before hook '{}'", method, ctx.path, entry.hook.id());
            if let Err(e) = entry.hook.run(&mut ctx, &entry.config, app).await {
                Self::handle_error(e, &mut ctx);
                return ctx;
            }
            if ctx.result.is_some() {
                break;
            }
        }

        if ctx.result.is_none() {
            debug!("{} {}: service", method, ctx.path);
            if let Err(e) = self.service.handle(&mut ctx, app).await {
                Self::handle_error(e, &mut ctx);
                return ctx;
            }
            if method != Method::Remove && !ctx.has_result() {
                let not_found = ServiceError::not_found(format!("No record found for '{}'", ctx.path));
                Self::handle_error(not_found.into(), &mut ctx);
                return ctx;
            }
        }

        for entry in self.hooks_for(method, HookStage::After) {
            debug!("{} {}: after hook '{}'", method, ctx.path, entry.hook.id());
            if let Err(e) = entry.hook.run(&mut ctx, &entry.config, app).await {
                Self::handle_error(e, &mut ctx);
                return ctx;
            }
        }

        if ctx.status_code.is_none() {
            ctx.status_code = Some(200);
        }
        ctx
    }

    /// Translates an error into the response carried by `ctx`.
    pub fn handle_error(error: BoxError, ctx: &mut Context) {
        let service_error = match error.downcast::<ServiceError>() {
            Ok(service_error) => *service_error,
            Err(other) => {
                error!("Unhandled error on {} {}: {}", ctx.method, ctx.path, other);
                ServiceError::internal("Unknown error")
            }
        };

        if service_error.status_code() >= 500 {
            warn!("{} {} failed: {}", ctx.method, ctx.path, service_error);
        } else {
            debug!("{} {} rejected: {}", ctx.method, ctx.path, service_error);
        }

        ctx.status_code = Some(service_error.status_code());
        ctx.result = Some(json!({
            "error": service_error.message(),
            "details": service_error.data(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handle_error_service_error() {
        let mut ctx = Context::new(Method::Get, "/posts/1");
        let err = ServiceError::conflict("taken").with_data(json!({ "field": "slug" }));
        Pipeline::handle_error(err.into(), &mut ctx);
        assert_eq!(ctx.status_code, Some(409));
        assert_eq!(ctx.result, Some(json!({ "error": "taken", "details": { "field": "slug" } })));
    }

    #[test]
    fn test_handle_error_unknown() {
        let mut ctx = Context::new(Method::Get, "/posts/1");
        let err: BoxError = "secret internals".into();
        Pipeline::handle_error(err, &mut ctx);
        assert_eq!(ctx.status_code, Some(500));
        assert_eq!(ctx.result, Some(json!({ "error": "Unknown error", "details": null })));
    }
}
