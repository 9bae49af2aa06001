mod common;

use async_trait::async_trait;
use common::{create_collection, request, test_app};
use schemabase::database::{CursorRequest, DatabaseError, DatabaseResult, IndexSpec, Migration};
use schemabase::{App, Database, IdSelector, Manifest, Method, SledDatabase};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Sled store whose index sync fails while `failing` is set.
struct FailingIndexes {
    inner: SledDatabase,
    failing: AtomicBool,
}

#[async_trait]
impl Database for FailingIndexes {
    async fn execute(&self, request: CursorRequest) -> DatabaseResult<Value> {
        self.inner.execute(request).await
    }

    async fn remove(&self, collection: &str, ids: &IdSelector) -> DatabaseResult<()> {
        self.inner.remove(collection, ids).await
    }

    async fn count(&self, collection: &str, query: &Map<String, Value>) -> DatabaseResult<u64> {
        self.inner.count(collection, query).await
    }

    async fn add_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()> {
        self.inner.add_indexes(collection, indexes).await
    }

    async fn sync_index(&self, collection: &str, indexes: &[IndexSpec]) -> DatabaseResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::Storage("disk full".to_string()));
        }
        self.inner.sync_index(collection, indexes).await
    }

    async fn migrate(&self, migration: &Migration) -> DatabaseResult<()> {
        self.inner.migrate(migration).await
    }
}

fn users_body() -> serde_json::Value {
    json!({
        "name": "users",
        "schema": {
            "name": { "type": "string", "required": true },
            "password": { "type": "string" }
        }
    })
}

#[tokio::test]
async fn test_create_list_and_get_collections() {
    let app = test_app();
    create_collection(&app, users_body()).await;

    let ctx = app.serve(request(Method::Find, "/collections")).await;
    assert_eq!(ctx.status(), 200);
    let collections = ctx.result.unwrap();
    assert_eq!(collections.as_array().unwrap().len(), 1);
    assert_eq!(collections[0]["name"], "users");

    let ctx = app.serve(request(Method::Get, "/collections/users")).await;
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.result.unwrap()["schema"]["name"]["required"], true);

    let ctx = app.serve(request(Method::Get, "/collections/ghosts")).await;
    assert_eq!(ctx.status(), 404);

    let ctx = app.serve(request(Method::Find, "/users")).await;
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.result.unwrap(), json!([]));
}

#[tokio::test]
async fn test_rejected_collection_definitions() {
    let app = test_app();
    create_collection(&app, users_body()).await;

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(users_body()))
        .await;
    assert_eq!(ctx.status(), 409);

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(json!({
            "name": "2bad",
            "schema": { "title": { "type": "string" } }
        })))
        .await;
    assert_eq!(ctx.status(), 400);

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(json!({
            "name": "posts",
            "schema": { "title": { "type": "text" } }
        })))
        .await;
    assert_eq!(ctx.status(), 400);

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(json!({
            "name": "posts",
            "schema": { "title": { "type": "string" } },
            "hooks": [{ "hookId": "no.such.hook", "method": "create", "stage": "before" }]
        })))
        .await;
    assert_eq!(ctx.status(), 400);

    // nothing was left behind by the failed attempts
    let ctx = app.serve(request(Method::Find, "/posts")).await;
    assert_eq!(ctx.status(), 404);
}

#[tokio::test]
async fn test_schema_patch_applies_to_later_requests() {
    let app = test_app();
    create_collection(&app, users_body()).await;

    let ctx = app
        .serve(request(Method::Create, "/users").with_data(json!({ "name": "Ada" })))
        .await;
    assert_eq!(ctx.status(), 200);

    let ctx = app
        .serve(request(Method::Patch, "/collections/users").with_data(json!({
            "schema": {
                "name": { "type": "string", "required": true },
                "role": { "type": "string", "required": true }
            }
        })))
        .await;
    assert_eq!(ctx.status(), 200);

    let ctx = app
        .serve(request(Method::Create, "/users").with_data(json!({ "name": "Bob" })))
        .await;
    assert_eq!(ctx.status(), 400);
    assert_eq!(ctx.result.unwrap()["details"]["field"], "role");

    let ctx = app
        .serve(request(Method::Patch, "/collections/ghosts").with_data(json!({ "description": "x" })))
        .await;
    assert_eq!(ctx.status(), 404);
}

#[tokio::test]
async fn test_remove_collection_unmounts_it() {
    let app = test_app();
    create_collection(&app, users_body()).await;

    let ctx = app.serve(request(Method::Remove, "/collections/users")).await;
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.result.unwrap()["name"], "users");
    assert!(app.collection("users").is_none());

    let ctx = app.serve(request(Method::Find, "/users")).await;
    assert_eq!(ctx.status(), 404);

    let ctx = app.serve(request(Method::Remove, "/collections/users")).await;
    assert_eq!(ctx.status(), 404);
}

#[tokio::test]
async fn test_builtin_hooks_bound_through_admin() {
    let app = test_app();
    let mut body = users_body();
    body["hooks"] = json!([
        { "hookId": "core.timestamps", "method": "create", "stage": "before" },
        { "hookId": "core.omit", "method": "find", "stage": "after", "config": { "fields": ["password"] } }
    ]);
    create_collection(&app, body).await;

    let ctx = app
        .serve(request(Method::Create, "/users").with_data(json!({ "name": "Ada", "password": "hunter2" })))
        .await;
    assert_eq!(ctx.status(), 200);
    let user = ctx.result.unwrap();
    assert!(user["createdAt"].is_string());
    assert!(user["updatedAt"].is_string());

    let ctx = app.serve(request(Method::Find, "/users")).await;
    let users = ctx.result.unwrap();
    assert_eq!(users[0]["name"], "Ada");
    assert!(users[0].get("password").is_none());

    let ctx = app.serve(request(Method::Get, "/collections/users")).await;
    assert_eq!(ctx.result.unwrap()["hooks"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_hook_config_is_rejected() {
    let app = test_app();
    let mut body = users_body();
    body["hooks"] = json!([{ "hookId": "core.omit", "method": "find", "stage": "after", "config": {} }]);

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(body))
        .await;
    assert_eq!(ctx.status(), 400);
}

#[tokio::test]
async fn test_admin_disabled() {
    let config = schemabase::AppConfig {
        admin_enabled: false,
        ..Default::default()
    };
    let app = schemabase::App::builder().config(config).build().unwrap();
    let ctx = app.serve(request(Method::Find, "/collections")).await;
    assert_eq!(ctx.status(), 404);
}

#[tokio::test]
async fn test_failed_index_sync_leaves_no_collection() {
    let database = Arc::new(FailingIndexes {
        inner: SledDatabase::temporary().unwrap(),
        failing: AtomicBool::new(true),
    });
    let app = App::builder().database(database.clone()).build().unwrap();

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(users_body()))
        .await;
    assert_eq!(ctx.status(), 500);
    assert!(app.manifest().collection("users").await.unwrap().is_none());
    assert!(app.manifest().get_hooks("users").await.unwrap().is_empty());
    assert!(app.collection("users").is_none());

    let ctx = app.serve(request(Method::Find, "/collections")).await;
    assert_eq!(ctx.result.unwrap(), json!([]));

    // a retry is not a conflict
    database.failing.store(false, Ordering::SeqCst);
    create_collection(&app, users_body()).await;
}

#[tokio::test]
async fn test_bad_pattern_is_rejected_when_bound() {
    let app = test_app();
    let mut body = users_body();
    body["hooks"] = json!([{
        "hookId": "core.pattern",
        "method": "create",
        "stage": "before",
        "config": { "field": "name", "pattern": "([a-z" }
    }]);

    let ctx = app
        .serve(request(Method::Create, "/collections").with_data(body))
        .await;
    assert_eq!(ctx.status(), 400);
    assert!(app.manifest().collection("users").await.unwrap().is_none());

    create_collection(&app, users_body()).await;
    let ctx = app
        .serve(request(Method::Patch, "/collections/users").with_data(json!({
            "hooks": [{
                "hookId": "core.pattern",
                "method": "create",
                "stage": "before",
                "config": { "field": "name", "pattern": "*" }
            }]
        })))
        .await;
    assert_eq!(ctx.status(), 400);
}

#[tokio::test]
async fn test_schema_keeps_declared_field_order() {
    let app = test_app();
    create_collection(
        &app,
        json!({
            "name": "places",
            "schema": {
                "zip": { "type": "string", "required": true },
                "city": { "type": "string", "required": true },
                "country": { "type": "string" }
            }
        }),
    )
    .await;

    let ctx = app.serve(request(Method::Get, "/collections/places")).await;
    let view = ctx.result.unwrap();
    let names: Vec<&str> = view["schema"].as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(names, vec!["zip", "city", "country"]);

    let ctx = app
        .serve(request(Method::Create, "/places").with_data(json!({})))
        .await;
    assert_eq!(ctx.status(), 400);
    assert_eq!(ctx.result.unwrap()["details"]["field"], "zip");
}
