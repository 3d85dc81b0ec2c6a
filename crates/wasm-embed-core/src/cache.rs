//! Per-engine cache of compiled modules.
//!
//! Entries are keyed by content hash and hold the source bytes, so a hash
//! collision never hands out another module's code. Each [`Module`] served
//! from the cache holds a [`CacheLease`]; the entry is evicted when the last
//! lease is dropped.
//!
//! [`Module`]: crate::Module

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::engine::EngineShared;

struct CachedModule {
    bytes: Box<[u8]>,
    module: wasmtime::Module,
    holders: usize,
}

/// Compiled modules shared by byte-identical loads.
#[derive(Default)]
pub(crate) struct ModuleCache {
    entries: DashMap<String, CachedModule>,
}

impl ModuleCache {
    /// Take a reference to the module compiled from `bytes`, if cached.
    pub(crate) fn acquire(&self, key: &str, bytes: &[u8]) -> Option<wasmtime::Module> {
        let mut entry = self.entries.get_mut(key)?;
        if *entry.bytes != *bytes {
            warn!(content_hash = key, "Content hash collision; bypassing cache");
            return None;
        }

        entry.holders += 1;
        Some(entry.module.clone())
    }

    /// Cache a freshly compiled module and take a reference to it.
    ///
    /// Returns the module to use and whether it is now held by the cache. If
    /// another load cached the same bytes first, that module is returned.
    pub(crate) fn insert(
        &self,
        key: String,
        bytes: &[u8],
        module: wasmtime::Module,
    ) -> (wasmtime::Module, bool) {
        match self.entries.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(CachedModule {
                    bytes: bytes.into(),
                    module: module.clone(),
                    holders: 1,
                });
                (module, true)
            }
            Entry::Occupied(mut occupied) if *occupied.get().bytes == *bytes => {
                let cached = occupied.get_mut();
                cached.holders += 1;
                (cached.module.clone(), true)
            }
            Entry::Occupied(_) => (module, false),
        }
    }

    /// Drop one reference to `key`, evicting the entry at zero.
    pub(crate) fn release(&self, key: &str) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) {
            let cached = occupied.get_mut();
            cached.holders = cached.holders.saturating_sub(1);
            if cached.holders == 0 {
                occupied.remove();
                debug!(content_hash = key, "Module evicted from cache");
            }
        }
    }

    /// Number of distinct cached modules.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

/// A module's reference to its cache entry, released on drop.
pub(crate) struct CacheLease {
    engine: Arc<EngineShared>,
    key: String,
}

impl CacheLease {
    pub(crate) fn new(engine: Arc<EngineShared>, key: String) -> Self {
        Self { engine, key }
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.engine.modules.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(wat: &str) -> wasmtime::Module {
        wasmtime::Module::new(&wasmtime::Engine::default(), wat).unwrap()
    }

    #[test]
    fn test_insert_then_acquire() {
        let cache = ModuleCache::default();
        let (_, cached) = cache.insert("k".into(), b"one", compile("(module)"));

        assert!(cached);
        assert!(cache.acquire("k", b"one").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_collision_bypasses_cache() {
        let cache = ModuleCache::default();
        cache.insert("k".into(), b"one", compile("(module)"));

        assert!(cache.acquire("k", b"two").is_none());

        let (_, cached) = cache.insert("k".into(), b"two", compile("(module)"));
        assert!(!cached);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicted_after_last_release() {
        let cache = ModuleCache::default();
        cache.insert("k".into(), b"one", compile("(module)"));
        cache.acquire("k", b"one").unwrap();

        cache.release("k");
        assert_eq!(cache.len(), 1);

        cache.release("k");
        assert_eq!(cache.len(), 0);

        // Releasing an unknown key is a no-op.
        cache.release("k");
    }
}
