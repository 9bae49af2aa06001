//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use schemabase::{App, BoxError, Context, Hook, Method, ServiceError};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// In-memory app with the built-in hooks and the admin service.
pub fn test_app() -> App {
    App::builder().build().expect("Failed to build test app")
}

pub fn request(method: Method, path: &str) -> Context {
    Context::new(method, path)
}

pub fn query(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("query must be an object")
}

/// Registers a collection through the admin service and asserts success.
pub async fn create_collection(app: &App, body: Value) {
    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(body))
        .await;
    assert_eq!(ctx.status(), 200, "collection creation failed: {:?}", ctx.result);
}

/// Shared call log.
pub type Calls = Arc<Mutex<Vec<String>>>;

pub fn calls() -> Calls {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().clone()
}

#[derive(Clone)]
pub enum Action {
    Pass,
    SetResult(Value),
    Fail(ServiceError),
    FailUnknown,
}

/// Hook that records its invocation and then performs a fixed action.
pub struct ScriptedHook {
    pub id: String,
    pub action: Action,
    pub calls: Calls,
}

impl ScriptedHook {
    pub fn new(id: &str, action: Action, calls: &Calls) -> Arc<dyn Hook> {
        Arc::new(Self {
            id: id.to_string(),
            action,
            calls: Arc::clone(calls),
        })
    }
}

#[async_trait]
impl Hook for ScriptedHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(&self, ctx: &mut Context, _config: &Value, _app: &App) -> Result<(), BoxError> {
        self.calls.lock().unwrap().push(self.id.clone());
        match &self.action {
            Action::Pass => Ok(()),
            Action::SetResult(value) => {
                ctx.result = Some(value.clone());
                Ok(())
            }
            Action::Fail(error) => Err(error.clone().into()),
            Action::FailUnknown => Err("database exploded".into()),
        }
    }
}
