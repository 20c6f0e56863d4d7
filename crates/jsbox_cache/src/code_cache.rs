//! Bounded LRU cache of package code
//!
//! Layout inside the store:
//! - `<prefix>:<packageName>` holds the code
//! - `<prefix>:__meta__` holds `{"<packageName>": <lastAccess>, ...}`
//!
//! The metadata is the source of truth for membership; a cache reopened over
//! the same store picks up where the previous one left off. `__meta__` is
//! therefore not a usable package name.

use jsbox_core::time::MonotonicClock;
use jsbox_core::CacheSettings;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::store::{CacheError, KeyValueStore, MemoryStore};

const META_KEY: &str = "__meta__";

static GLOBAL: Lazy<CodeCache<MemoryStore>> = Lazy::new(|| CodeCache::in_memory(&CacheSettings::default()));

pub struct CodeCache<S: KeyValueStore> {
    inner: Mutex<Inner<S>>,
}

struct Inner<S> {
    store: S,
    /// packageName → last access stamp
    meta: BTreeMap<String, u64>,
    clock: MonotonicClock,
    capacity: usize,
    prefix: String,
}

impl CodeCache<MemoryStore> {
    pub fn in_memory(settings: &CacheSettings) -> Self {
        Self::with_meta(MemoryStore::new(), settings, BTreeMap::new())
    }

    /// Process-wide cache over a memory store
    pub fn global() -> &'static CodeCache<MemoryStore> {
        &GLOBAL
    }
}

impl<S: KeyValueStore> CodeCache<S> {
    /// Open a cache over `store`, recovering entries recorded in its metadata.
    pub fn open(store: S, settings: &CacheSettings) -> Result<Self, CacheError> {
        let meta = match store.get(&format!("{}:{META_KEY}", settings.key_prefix))? {
            Some(json) => serde_json::from_str(&json)?,
            None => BTreeMap::new(),
        };
        Ok(Self::with_meta(store, settings, meta))
    }

    fn with_meta(store: S, settings: &CacheSettings, meta: BTreeMap<String, u64>) -> Self {
        let last = meta.values().copied().max().unwrap_or(0);
        Self {
            inner: Mutex::new(Inner {
                store,
                meta,
                clock: MonotonicClock::starting_after(last),
                capacity: settings.capacity.max(1),
                prefix: settings.key_prefix.clone(),
            }),
        }
    }

    /// Cached code for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<String> {
        if key == META_KEY {
            return None;
        }
        let mut inner = self.inner.lock();
        if !inner.meta.contains_key(key) {
            return None;
        }
        match inner.store.get(&inner.code_key(key)) {
            Ok(Some(code)) => {
                let stamp = inner.clock.tick();
                inner.meta.insert(key.to_string(), stamp);
                inner.persist_meta();
                Some(code)
            }
            Ok(None) => {
                tracing::debug!(%key, "cached code vanished from the store; forgetting it");
                inner.meta.remove(key);
                inner.persist_meta();
                None
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "code cache read failed");
                None
            }
        }
    }

    /// Store `value` under `key`. Empty keys and values, and the reserved
    /// metadata key, are ignored; a new key at capacity evicts the least
    /// recently used entry first.
    pub fn set(&self, key: &str, value: &str) {
        if key.is_empty() || value.is_empty() {
            return;
        }
        if key == META_KEY {
            tracing::warn!(%key, "refusing to cache under the reserved metadata key");
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.meta.contains_key(key) && inner.meta.len() >= inner.capacity {
            inner.evict_oldest();
        }

        let code_key = inner.code_key(key);
        if let Err(err) = inner.store.set(&code_key, value) {
            tracing::warn!(%key, error = %err, "code cache write failed");
            inner.persist_meta();
            return;
        }
        let stamp = inner.clock.tick();
        inner.meta.insert(key.to_string(), stamp);
        inner.persist_meta();
    }

    /// Drop one entry. Returns whether it was cached.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.meta.remove(key).is_none() {
            return false;
        }
        inner.remove_code(key);
        inner.persist_meta();
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner.meta.keys().cloned().collect();
        for key in &keys {
            inner.remove_code(key);
        }
        inner.meta.clear();
        let meta_key = inner.meta_key();
        if let Err(err) = inner.store.remove(&meta_key) {
            tracing::warn!(error = %err, "failed to remove code cache metadata");
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().meta.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().meta.contains_key(key)
    }

    /// Cached package names, least recently used first
    pub fn keys_by_recency(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut entries: Vec<(&String, &u64)> = inner.meta.iter().collect();
        entries.sort_by_key(|(_, stamp)| **stamp);
        entries.into_iter().map(|(key, _)| key.clone()).collect()
    }
}

impl<S: KeyValueStore> Inner<S> {
    fn code_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    fn meta_key(&self) -> String {
        format!("{}:{META_KEY}", self.prefix)
    }

    fn evict_oldest(&mut self) {
        // BTreeMap order makes the pick among equal stamps deterministic.
        let Some(oldest) = self
            .meta
            .iter()
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(key, _)| key.clone())
        else {
            return;
        };
        self.meta.remove(&oldest);
        self.remove_code(&oldest);
        tracing::debug!(key = %oldest, "evicted least recently used code");
    }

    fn remove_code(&mut self, key: &str) {
        let code_key = self.code_key(key);
        if let Err(err) = self.store.remove(&code_key) {
            tracing::warn!(%key, error = %err, "failed to remove cached code");
        }
    }

    fn persist_meta(&mut self) {
        let json = match serde_json::to_string(&self.meta) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize code cache metadata");
                return;
            }
        };
        let meta_key = self.meta_key();
        if let Err(err) = self.store.set(&meta_key, &json) {
            tracing::warn!(error = %err, "failed to persist code cache metadata");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn cache() -> CodeCache<MemoryStore> {
        CodeCache::in_memory(&CacheSettings::default())
    }

    #[test]
    fn set_then_get() {
        let cache = cache();
        cache.set("react", "export default {}");
        assert_eq!(cache.get("react").as_deref(), Some("export default {}"));
        assert_eq!(cache.get("vue"), None);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn empty_keys_and_values_are_ignored() {
        let cache = cache();
        cache.set("", "code");
        cache.set("react", "");
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn reserved_metadata_key_is_not_cacheable() {
        let cache = cache();
        cache.set("react", "export default {}");
        cache.set("__meta__", "export default 1;");
        assert_eq!(cache.get("__meta__"), None);
        assert_eq!(cache.count(), 1);
        assert!(!cache.remove("__meta__"));
        assert_eq!(cache.get("react").as_deref(), Some("export default {}"));
    }

    #[test]
    fn overwrite_does_not_grow() {
        let cache = cache();
        cache.set("react", "v1");
        cache.set("react", "v2");
        assert_eq!(cache.count(), 1);
        assert_eq!(cache.get("react").as_deref(), Some("v2"));
    }

    #[test]
    fn the_hundred_and_first_insert_evicts_the_oldest() {
        let cache = cache();
        for i in 0..101 {
            cache.set(&format!("pkg-{i}"), "code");
        }
        assert_eq!(cache.count(), 100);
        assert!(!cache.contains("pkg-0"));
        assert!(cache.contains("pkg-1"));
        assert!(cache.contains("pkg-100"));
    }

    #[test]
    fn access_protects_from_eviction() {
        let cache = cache();
        for i in 0..100 {
            cache.set(&format!("pkg-{i}"), "code");
        }
        assert!(cache.get("pkg-0").is_some());
        cache.set("pkg-100", "code");
        assert!(cache.contains("pkg-0"));
        assert!(!cache.contains("pkg-1"));
        assert_eq!(cache.keys_by_recency().last().map(String::as_str), Some("pkg-100"));
    }

    #[test]
    fn overwriting_at_capacity_evicts_nothing() {
        let cache = CodeCache::in_memory(&CacheSettings {
            capacity: 2,
            ..CacheSettings::default()
        });
        cache.set("a", "1");
        cache.set("b", "2");
        cache.set("a", "3");
        assert_eq!(cache.count(), 2);
        assert!(cache.contains("b"));
    }

    #[test]
    fn remove_and_clear() {
        let cache = cache();
        cache.set("a", "1");
        cache.set("b", "2");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.count(), 1);
        cache.clear();
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn persisted_layout_uses_prefixed_keys() {
        let settings = CacheSettings::default();
        let dir = tempfile::tempdir().unwrap();
        let cache = CodeCache::open(FileStore::open(dir.path()).unwrap(), &settings).unwrap();
        cache.set("@scope/pkg", "export const x = 1;");

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get("jsbox-code:@scope/pkg").unwrap().as_deref(),
            Some("export const x = 1;")
        );
        let meta: BTreeMap<String, u64> =
            serde_json::from_str(&store.get("jsbox-code:__meta__").unwrap().unwrap()).unwrap();
        assert!(meta.contains_key("@scope/pkg"));
    }

    #[test]
    fn reopened_cache_recovers_entries_and_recency() {
        let settings = CacheSettings {
            capacity: 2,
            ..CacheSettings::default()
        };
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = CodeCache::open(FileStore::open(dir.path()).unwrap(), &settings).unwrap();
            cache.set("old", "1");
            cache.set("new", "2");
        }

        let cache = CodeCache::open(FileStore::open(dir.path()).unwrap(), &settings).unwrap();
        assert_eq!(cache.count(), 2);
        cache.set("newest", "3");
        assert!(!cache.contains("old"));
        assert_eq!(cache.get("new").as_deref(), Some("2"));
    }

    #[test]
    fn corrupt_metadata_is_an_open_error() {
        let mut store = MemoryStore::new();
        store.set("jsbox-code:__meta__", "not json").unwrap();
        assert!(matches!(
            CodeCache::open(store, &CacheSettings::default()),
            Err(CacheError::Metadata(_))
        ));
    }

    #[test]
    fn global_cache_is_shared() {
        CodeCache::global().set("global-test-pkg", "code");
        assert!(CodeCache::global().contains("global-test-pkg"));
        assert!(CodeCache::global().remove("global-test-pkg"));
    }
}
