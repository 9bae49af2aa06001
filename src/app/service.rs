use async_trait::async_trait;
use futures::future::BoxFuture;

use super::App;
use crate::context::Context;
use crate::error::BoxError;

/// Sub-paths a service answers below its mount point.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Routes {
    paths: Vec<String>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sub-path; `""` is the mount point itself, `":id"` a dynamic
    /// segment below it.
    pub fn install(&mut self, subpath: impl Into<String>) -> &mut Self {
        let subpath = subpath.into();
        if !self.paths.contains(&subpath) {
            self.paths.push(subpath);
        }
        self
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

#[async_trait]
pub trait Service: Send + Sync {
    /// Produces `ctx.result` (and optionally `ctx.status_code`).
    async fn handle(&self, ctx: &mut Context, app: &App) -> Result<(), BoxError>;

    /// Declares the sub-paths sharing this service's pipeline.
    fn register(&self, routes: &mut Routes) {
        routes.install("");
    }
}

/// Signature of a bare handler usable with [`App::mount_fn`].
pub type HandlerFn =
    dyn for<'a> Fn(&'a mut Context, &'a App) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync;

/// Adapts a handler function into a [`Service`] answering the mount point
/// and its `:id` sub-path.
pub struct FnService {
    handler: Box<HandlerFn>,
}

impl FnService {
    pub fn new<F>(handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, &'a App) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Service for FnService {
    async fn handle(&self, ctx: &mut Context, app: &App) -> Result<(), BoxError> {
        (self.handler)(ctx, app).await
    }

    fn register(&self, routes: &mut Routes) {
        routes.install("").install(":id");
    }
}
