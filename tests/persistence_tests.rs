mod common;

use common::{create_collection, request};
use schemabase::database::{Migration, MigrationOp};
use schemabase::manifest::{CollectionConfig, HookBinding};
use schemabase::{
    App, Database, Definition, HookStage, Manifest, Method, SchemaDefinitions, SledDatabase,
    SledManifest,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Builds an app over `db`, the way a restarted process would see it.
fn app_over(db: &sled::Db) -> App {
    App::builder()
        .database(Arc::new(SledDatabase::new(db.clone()).unwrap()))
        .manifest(Arc::new(SledManifest::new(db).unwrap()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_collections_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();

    {
        let app = app_over(&db);
        create_collection(
            &app,
            json!({ "name": "notes", "schema": { "text": { "type": "string", "required": true } } }),
        )
        .await;
        let ctx = app
            .serve(request(Method::Create, "/notes").with_data(json!({ "text": "remember me" })))
            .await;
        assert_eq!(ctx.status(), 200);
    }

    let app = app_over(&db);
    assert!(app.collection("notes").is_none());
    let ctx = app.serve(request(Method::Find, "/notes")).await;
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.result.unwrap()[0]["text"], "remember me");
    assert!(app.collection("notes").is_some());

    // the schema came back too
    let ctx = app
        .serve(request(Method::Create, "/notes").with_data(json!({})))
        .await;
    assert_eq!(ctx.status(), 400);
}

#[tokio::test]
async fn test_pending_migrations_run_on_startup() {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let database: Arc<dyn Database> = Arc::new(SledDatabase::new(db.clone()).unwrap());
    let manifest = Arc::new(SledManifest::new(&db).unwrap());

    let mut schema = SchemaDefinitions::new();
    schema.insert("fullname".to_string(), Definition::string());
    schema.insert("role".to_string(), Definition::string());
    manifest
        .set_collection("people", CollectionConfig::new(schema))
        .await
        .unwrap();
    database
        .create("people", json!({ "name": "Ada" }))
        .unwrap()
        .exec()
        .await
        .unwrap();
    manifest
        .add_migration(Migration {
            version: 1,
            collection: "people".to_string(),
            description: None,
            operations: vec![
                MigrationOp::RenameField { from: "name".to_string(), to: "fullname".to_string() },
                MigrationOp::SetDefault { field: "role".to_string(), value: json!("member") },
            ],
        })
        .await
        .unwrap();

    let app = App::builder()
        .database(database)
        .manifest(manifest.clone())
        .build()
        .unwrap();
    let ctx = app.serve(request(Method::Find, "/people")).await;
    assert_eq!(ctx.status(), 200);
    let people = ctx.result.unwrap();
    assert_eq!(people[0]["fullname"], "Ada");
    assert_eq!(people[0]["role"], "member");
    assert!(people[0].get("name").is_none());
    assert_eq!(manifest.get_last_migration_commit().await.unwrap(), Some(1));
}

#[tokio::test]
async fn test_failed_initialisation_is_reported_every_time() {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let manifest = Arc::new(SledManifest::new(&db).unwrap());

    let mut schema = SchemaDefinitions::new();
    schema.insert("text".to_string(), Definition::string());
    manifest
        .set_collection("notes", CollectionConfig::new(schema))
        .await
        .unwrap();
    manifest
        .set_hooks(
            "notes",
            vec![HookBinding {
                hook_id: "missing.hook".to_string(),
                method: Method::Create,
                stage: HookStage::Before,
                config: Value::Null,
            }],
        )
        .await
        .unwrap();

    let app = App::builder()
        .database(Arc::new(SledDatabase::new(db.clone()).unwrap()))
        .manifest(manifest)
        .build()
        .unwrap();

    for _ in 0..2 {
        let ctx = app.serve(request(Method::Find, "/collections")).await;
        assert_eq!(ctx.status(), 500);
        assert_eq!(ctx.result.unwrap()["error"], "Application failed to initialize");
    }
}
