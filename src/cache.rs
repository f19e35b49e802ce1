//! Require-once loading of script classes.

use crate::class::ScriptClass;
use crate::engine::RhaiEngine;
use crate::error::{Result, RhaiError};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument};

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of bound classes.
    pub cached_classes: usize,
    /// Lookups answered by an existing binding.
    pub hits: u64,
    /// Lookups that executed the source.
    pub loads: u64,
    /// Explicit invalidations.
    pub invalidations: u64,
}

/// Ensures each class source runs at most once between invalidations.
///
/// The binding itself lives in the engine's namespace. Concurrent callers
/// racing to load the same class serialize on a per-name lock, so the
/// source is executed once and everyone gets the same handle.
pub struct ClassCache {
    engine: Arc<RhaiEngine>,
    load_locks: DashMap<String, Arc<Mutex<()>>>,
    hits: AtomicU64,
    loads: AtomicU64,
    invalidations: AtomicU64,
}

impl ClassCache {
    /// Create a cache over the engine's namespace.
    pub fn new(engine: Arc<RhaiEngine>) -> Self {
        Self {
            engine,
            load_locks: DashMap::new(),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Return the bound class, loading `virtual_path` first if needed.
    #[instrument(skip(self))]
    pub fn ensure_loaded(&self, virtual_path: &str, class_name: &str) -> Result<Arc<ScriptClass>> {
        if let Some(class) = self.engine.class(class_name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(generation = class.generation(), "Class already loaded");
            return Ok(class);
        }

        let lock = self
            .load_locks
            .entry(class_name.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock();

        // Another request may have loaded it while we waited.
        if let Some(class) = self.engine.class(class_name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(class);
        }

        self.engine.execute_file(virtual_path, true)?;
        self.loads.fetch_add(1, Ordering::Relaxed);

        self.engine
            .class(class_name)
            .ok_or_else(|| RhaiError::ClassNotDefined {
                class_name: class_name.to_string(),
                path: virtual_path.to_string(),
            })
    }

    /// Drop the binding so the next [`ensure_loaded`](Self::ensure_loaded)
    /// reloads from source. The reloaded class also gets fresh filter metadata.
    pub fn invalidate(&self, class_name: &str) -> bool {
        let lock = self
            .load_locks
            .entry(class_name.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock();

        let removed = self.engine.remove_global_class(class_name);
        if removed {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_classes: self.engine.class_names().len(),
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// The engine this cache loads into.
    pub fn engine(&self) -> &Arc<RhaiEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const LOADING_CONTROLLER: &str = r#"
        set_global("loads", get_global("loads") + 1);
        fn index() { "ok" }
    "#;

    fn setup(source: &str) -> (TempDir, ClassCache) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("Controllers");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("HomeController.rhai"), source).unwrap();

        let engine = RhaiEngine::builder()
            .application_root(temp.path())
            .build()
            .unwrap();
        engine.define_global("loads", 0_i64);
        (temp, ClassCache::new(Arc::new(engine)))
    }

    fn loads(cache: &ClassCache) -> i64 {
        cache.engine().get_global("loads").unwrap().as_int().unwrap()
    }

    #[test]
    fn test_second_lookup_reuses_class() {
        let (_temp, cache) = setup(LOADING_CONTROLLER);
        let path = "~/Controllers/HomeController.rhai";

        let first = cache.ensure_loaded(path, "HomeController").unwrap();
        let second = cache.ensure_loaded(path, "HomeController").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads(&cache), 1);

        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.cached_classes, 1);
    }

    #[test]
    fn test_invalidate_reloads_with_new_generation() {
        let (_temp, cache) = setup(LOADING_CONTROLLER);
        let path = "~/Controllers/HomeController.rhai";

        let first = cache.ensure_loaded(path, "HomeController").unwrap();
        assert!(cache.invalidate("HomeController"));
        assert!(!cache.invalidate("HomeController"));

        let second = cache.ensure_loaded(path, "HomeController").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(loads(&cache), 2);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn test_concurrent_resolution_loads_once() {
        let (_temp, cache) = setup(LOADING_CONTROLLER);
        let path = "~/Controllers/HomeController.rhai";

        let classes: Vec<Arc<ScriptClass>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.ensure_loaded(path, "HomeController").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(loads(&cache), 1);
        assert!(classes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_source_without_expected_class() {
        let (_temp, cache) = setup("fn index() { 1 }");

        let err = cache
            .ensure_loaded("~/Controllers/HomeController.rhai", "OtherController")
            .unwrap_err();
        assert!(matches!(err, RhaiError::ClassNotDefined { .. }));
    }

    #[test]
    fn test_missing_source() {
        let (_temp, cache) = setup("fn index() { 1 }");

        let err = cache
            .ensure_loaded("~/Controllers/NopeController.rhai", "NopeController")
            .unwrap_err();
        assert!(matches!(err, RhaiError::FileNotFound { .. }));
    }
}
