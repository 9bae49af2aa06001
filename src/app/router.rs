//! Prefix-tree router mapping request paths to pipelines.
//!
//! Routes are written with `:param` segments (`/posts/:id`); the trie uses
//! `{param}`, so paths are translated on insert.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::Pipeline;
use crate::error::{SetupError, SetupResult};

/// Joins a mount prefix and a sub-path into a normalized route.
pub fn join_path(prefix: &str, subpath: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(subpath.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Strips trailing and duplicate slashes from a request path.
pub fn normalize_path(path: &str) -> String {
    join_path(path, "")
}

fn to_trie_syntax(route: &str) -> String {
    route
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub struct RouteMatch {
    pub pipeline: Arc<Pipeline>,
    pub params: HashMap<String, String>,
}

pub struct Router {
    trie: matchit::Router<Arc<Pipeline>>,
    routes: IndexMap<String, Arc<Pipeline>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            trie: matchit::Router::new(),
            routes: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, route: &str, pipeline: Arc<Pipeline>) -> SetupResult<()> {
        let route = normalize_path(route);
        self.trie
            .insert(to_trie_syntax(&route), Arc::clone(&pipeline))
            .map_err(|e| SetupError::Route {
                path: route.clone(),
                reason: e.to_string(),
            })?;
        self.routes.insert(route, pipeline);
        Ok(())
    }

    pub fn at(&self, path: &str) -> Option<RouteMatch> {
        let path = normalize_path(path);
        let matched = self.trie.at(&path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(RouteMatch {
            pipeline: Arc::clone(matched.value),
            params,
        })
    }

    pub fn contains(&self, route: &str) -> bool {
        self.routes.contains_key(&normalize_path(route))
    }

    /// Removes every route served by the pipeline mounted at `route`.
    /// Returns the removed routes.
    pub fn remove_mount(&mut self, route: &str) -> Vec<String> {
        let pipeline = match self.routes.get(&normalize_path(route)) {
            Some(pipeline) => Arc::clone(pipeline),
            None => return Vec::new(),
        };
        let removed: Vec<String> = self
            .routes
            .iter()
            .filter(|(_, p)| Arc::ptr_eq(p, &pipeline))
            .map(|(r, _)| r.clone())
            .collect();
        self.routes.retain(|_, p| !Arc::ptr_eq(p, &pipeline));
        self.rebuild();
        removed
    }

    fn rebuild(&mut self) {
        let mut trie = matchit::Router::new();
        for (route, pipeline) in &self.routes {
            // every stored route was accepted by a trie before
            if let Err(e) = trie.insert(to_trie_syntax(route), Arc::clone(pipeline)) {
                log::error!("Failed to re-insert route '{}': {}", route, e);
            }
        }
        self.trie = trie;
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
