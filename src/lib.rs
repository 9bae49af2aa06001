//! # schemabase
//!
//! Schema-driven CRUD backend core. Collections declared with a schema get a
//! REST-shaped service with payload validation, query casting, relation
//! population and a per-route pipeline of before/after hooks.
//!
//! The main pieces:
//!
//! * [`schema`] validates payloads and casts query filters
//! * [`database`] is the storage contract plus a sled-backed adapter
//! * [`collection`] binds a schema to storage and exposes it as a service
//! * [`hooks`] holds the hook registry and the built-in hooks
//! * [`app`] routes requests to pipelines
//!
//! ```no_run
//! use schemabase::{App, AppConfig, Context, Method};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = App::open(AppConfig::default().with_storage_path("data"))?;
//! let ctx = app.serve(Context::new(Method::Find, "/collections")).await;
//! println!("{} {:?}", ctx.status(), ctx.result);
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod collection;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod manifest;
pub mod schema;

pub use app::{App, AppBuilder, FnService, Pipeline, Routes, Service};
pub use collection::{Collection, CollectionService, CollectionsService, SchemaSource};
pub use config::AppConfig;
pub use context::{Context, Method};
pub use database::{Database, IdSelector, SledDatabase};
pub use error::{BoxError, ServiceError, SetupError};
pub use hooks::{Hook, HookStage, HooksRegistry};
pub use manifest::{Manifest, SledManifest};
pub use schema::{Definition, DefinitionType, Schema, SchemaDefinitions, ValidationError};
