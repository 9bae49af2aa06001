//! The application: hook registry, storage, manifest and the route table.
//!
//! An [`App`] is cheap to clone and shared by every in-flight request.
//! Routes may change at runtime (the administrative service mounts and
//! unmounts collections), everything else is fixed at build time.

pub mod pipeline;
pub mod router;
pub mod service;

use futures::future::BoxFuture;
use log::{error, info};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::collection::{Collection, CollectionService, CollectionsService, SchemaSource};
use crate::config::AppConfig;
use crate::context::Context;
use crate::database::{Database, SledDatabase};
use crate::error::{BoxError, ServiceError, SetupResult};
use crate::hooks::{Hook, HooksRegistry};
use crate::manifest::{Manifest, SledManifest};

pub use pipeline::Pipeline;
pub use router::{join_path, Router};
pub use service::{FnService, Routes, Service};

#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: AppConfig,
    database: Arc<dyn Database>,
    manifest: Arc<dyn Manifest>,
    hooks: HooksRegistry,
    router: RwLock<Router>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    init: OnceCell<Result<(), String>>,
    admin_lock: Mutex<()>,
}

pub struct AppBuilder {
    config: AppConfig,
    database: Option<Arc<dyn Database>>,
    manifest: Option<Arc<dyn Manifest>>,
    hooks: HooksRegistry,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            database: None,
            manifest: None,
            hooks: HooksRegistry::with_builtin(),
        }
    }
}

impl AppBuilder {
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn manifest(mut self, manifest: Arc<dyn Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Replaces the hook registry (built-in hooks included by default).
    pub fn hooks(mut self, hooks: HooksRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hook<H: Hook + 'static>(mut self, hook: H) -> SetupResult<Self> {
        self.hooks.register(hook)?;
        Ok(self)
    }

    /// Opens the sled store for whichever of database and manifest were not
    /// supplied, then mounts the administrative service.
    pub fn build(self) -> SetupResult<App> {
        self.config.validate()?;

        let (database, manifest) = match (self.database, self.manifest) {
            (Some(database), Some(manifest)) => (database, manifest),
            (database, manifest) => {
                let db = match &self.config.storage_path {
                    Some(path) => sled::open(path)?,
                    None => sled::Config::new().temporary(true).open()?,
                };
                let database: Arc<dyn Database> = match database {
                    Some(database) => database,
                    None => Arc::new(SledDatabase::new(db.clone())?),
                };
                let manifest: Arc<dyn Manifest> = match manifest {
                    Some(manifest) => manifest,
                    None => Arc::new(SledManifest::new(&db)?),
                };
                (database, manifest)
            }
        };

        let app = App {
            inner: Arc::new(AppInner {
                config: self.config,
                database,
                manifest,
                hooks: self.hooks,
                router: RwLock::new(Router::new()),
                collections: RwLock::new(HashMap::new()),
                init: OnceCell::new(),
                admin_lock: Mutex::new(()),
            }),
        };

        if app.config().admin_enabled {
            let admin_path = app.config().admin_path.clone();
            app.mount(&admin_path, Arc::new(CollectionsService::new()))?;
        }
        Ok(app)
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    /// Initialises logging and builds an app backed by sled at
    /// `config.storage_path`.
    pub fn open(config: AppConfig) -> SetupResult<App> {
        crate::logging::init(&config.logging);
        App::builder().config(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.inner.database
    }

    pub fn manifest(&self) -> &Arc<dyn Manifest> {
        &self.inner.manifest
    }

    pub fn hooks(&self) -> &HooksRegistry {
        &self.inner.hooks
    }

    /// Mounts `service` at `path`. Every sub-path the service registers
    /// shares the returned pipeline.
    pub fn mount(&self, path: &str, service: Arc<dyn Service>) -> SetupResult<Arc<Pipeline>> {
        let mut routes = Routes::new();
        service.register(&mut routes);
        let pipeline = Arc::new(Pipeline::new(service));

        let mut router = self.inner.router.write().unwrap_or_else(|e| e.into_inner());
        let mut inserted: Option<String> = None;
        for subpath in routes.paths() {
            let route = join_path(path, subpath);
            if let Err(e) = router.insert(&route, Arc::clone(&pipeline)) {
                if let Some(first) = &inserted {
                    router.remove_mount(first);
                }
                return Err(e);
            }
            inserted.get_or_insert(route);
        }

        info!("Mounted service at '{}' ({} route(s))", path, routes.paths().len());
        Ok(pipeline)
    }

    pub fn mount_fn<F>(&self, path: &str, handler: F) -> SetupResult<Arc<Pipeline>>
    where
        F: for<'a> Fn(&'a mut Context, &'a App) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        self.mount(path, Arc::new(FnService::new(handler)))
    }

    /// Removes every route of the service mounted at `path`.
    pub fn unmount(&self, path: &str) -> bool {
        let removed = self
            .inner
            .router
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove_mount(&join_path(path, ""));
        if !removed.is_empty() {
            info!("Unmounted '{}'", path);
        }
        !removed.is_empty()
    }

    pub fn is_mounted(&self, path: &str) -> bool {
        self.inner
            .router
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&join_path(path, ""))
    }

    /// Mounts the manifest collection `name` at `/<name>` with its stored
    /// hook bindings.
    pub async fn mount_collection(&self, name: &str) -> SetupResult<Arc<Pipeline>> {
        let source = SchemaSource::Manifest(name.to_string());
        let collection = Arc::new(
            Collection::new(name, Arc::clone(self.database()), source)
                .with_manifest(Arc::clone(self.manifest())),
        );
        let bindings = self.manifest().get_hooks(name).await?;

        let service = CollectionService::new(Arc::clone(&collection))
            .with_max_limit(self.config().max_limit);
        let path = join_path("/", name);
        let pipeline = self.mount(&path, Arc::new(service))?;
        for binding in &bindings {
            if let Err(e) = pipeline.bind(self.hooks(), binding) {
                self.unmount(&path);
                return Err(e);
            }
        }

        self.inner
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), collection);
        Ok(pipeline)
    }

    pub fn unmount_collection(&self, name: &str) -> bool {
        self.inner
            .collections
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        self.unmount(&join_path("/", name))
    }

    /// Collection mounted through [`App::mount_collection`].
    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.inner
            .collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Serializes administrative check-then-write sequences.
    pub(crate) async fn lock_admin(&self) -> MutexGuard<'_, ()> {
        self.inner.admin_lock.lock().await
    }

    /// Runs one-time initialisation. The outcome is memoised, failures
    /// included.
    pub async fn ready(&self) -> Result<(), ServiceError> {
        let outcome = self
            .inner
            .init
            .get_or_init(|| async {
                self.initialize().await.map_err(|e| {
                    error!("Application initialisation failed: {}", e);
                    e.to_string()
                })
            })
            .await;
        outcome
            .as_ref()
            .map(|_| ())
            .map_err(|_| ServiceError::internal("Application failed to initialize"))
    }

    async fn initialize(&self) -> SetupResult<()> {
        let manifest = self.manifest();

        let mut version = manifest.get_last_migration_commit().await?.map_or(1, |v| v + 1);
        while let Some(migration) = manifest.get_migration(version).await? {
            self.database().migrate(&migration).await?;
            manifest.commit_migration(version).await?;
            version += 1;
        }

        for (name, config) in manifest.collections().await? {
            self.database().sync_index(&name, &config.all_indexes()).await?;
            if !self.is_mounted(&join_path("/", &name)) {
                self.mount_collection(&name).await?;
            }
        }
        Ok(())
    }

    /// Routes a request to its pipeline.
    pub async fn serve(&self, mut ctx: Context) -> Context {
        if let Err(e) = self.ready().await {
            Pipeline::handle_error(e.into(), &mut ctx);
            return ctx;
        }

        let matched = {
            let router = self.inner.router.read().unwrap_or_else(|e| e.into_inner());
            router.at(&ctx.path)
        };
        match matched {
            Some(matched) => {
                ctx.params.extend(matched.params);
                matched.pipeline.run(ctx, self).await
            }
            None => {
                let not_found = ServiceError::not_found(format!("Path '{}' not found", ctx.path));
                Pipeline::handle_error(not_found.into(), &mut ctx);
                ctx
            }
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let router = self.inner.router.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("App")
            .field("routes", &router.routes().collect::<Vec<_>>())
            .field("hooks", &self.inner.hooks.ids())
            .finish()
    }
}
