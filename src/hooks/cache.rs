use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Entries kept by [`CompiledCache::new`].
pub const DEFAULT_CAPACITY: usize = 256;

/// Per-config cache of values a hook derives from its config (compiled
/// regexes and the like). Entries are keyed by the SHA-256 of the config's
/// JSON form, so equal configs share one entry. Once full, the least
/// recently used entry is evicted.
pub struct CompiledCache<T> {
    entries: Mutex<LruCache<String, Arc<T>>>,
}

impl<T> Default for CompiledCache<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> CompiledCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn key(config: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(config.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the cached value for `config`, compiling it on first use.
    /// Failed compilations are not cached.
    pub fn get_or_try_compile<E>(
        &self,
        config: &Value,
        compile: impl FnOnce(&Value) -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        let key = Self::key(config);
        if let Some(hit) = self.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(compile(config)?);
        self.lock().get_or_insert(key, || Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<T>>> {
        // a poisoned map still holds valid entries
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
