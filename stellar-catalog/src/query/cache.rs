//! Read-through result cache.
//!
//! Entries are keyed by the store root plus the bit-exact [`SpecKey`], so two
//! specs that differ in any field (including epoch and sampling seed) never
//! share an entry. Expiry is driven by an injected [`Clock`] so tests can
//! advance time by hand.

use crate::config::CacheConfig;
use crate::query::engine::{QueryEngine, ResultSet};
use crate::query::spec::{QuerySpec, SpecKey};
use crate::store::StoreHandle;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type CacheKey = (PathBuf, SpecKey);

struct Entry {
    result: Arc<ResultSet>,
    inserted: Instant,
}

pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: config.capacity,
            ttl: Duration::from_secs(config.ttl_secs),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Returns the cached result for `spec` against `store`, running the
    /// query on a miss or an expired entry.
    ///
    /// The lock is not held while the query runs; two concurrent misses on
    /// the same key both execute and the later insert wins.
    pub fn get_or_execute(
        &self,
        engine: &QueryEngine,
        store: &StoreHandle,
        spec: &QuerySpec,
    ) -> Arc<ResultSet> {
        let key = (store.root().to_path_buf(), spec.cache_key());
        let now = self.clock.now();
        if let Some(hit) = self.lookup(&key, now) {
            trace!("cache hit");
            return hit;
        }

        let result = Arc::new(engine.execute(store, spec));
        if self.capacity > 0 {
            if let Ok(mut entries) = self.entries.lock() {
                self.evict(&mut entries, now);
                entries.insert(
                    key,
                    Entry {
                        result: Arc::clone(&result),
                        inserted: now,
                    },
                );
            }
        }
        result
    }

    fn lookup(&self, key: &CacheKey, now: Instant) -> Option<Arc<ResultSet>> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(key)
            .map(|e| now.saturating_duration_since(e.inserted) < self.ttl)?;
        if fresh {
            entries.get(key).map(|e| Arc::clone(&e.result))
        } else {
            entries.remove(key);
            None
        }
    }

    /// Drops expired entries, then the oldest ones until there is room for one more.
    fn evict(&self, entries: &mut HashMap<CacheKey, Entry>, now: Instant) {
        entries.retain(|_, e| now.saturating_duration_since(e.inserted) < self.ttl);
        while entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => break,
            }
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::record::StarRecord;
    use crate::store::{PartitionLayout, StoreWriter};
    use stellar_core::Vector3;
    use tempfile::TempDir;

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn fixture() -> (TempDir, StoreHandle, QueryEngine) {
        let dir = TempDir::new().unwrap();
        let record = StarRecord {
            source_id: 1,
            direction: Vector3::x_axis(),
            distance_ly: 10.0,
            velocity: Vector3::y_axis(),
            magnitude: 5.0,
            healpix_sector: 0,
            distance_bin: 0,
        };
        StoreWriter::new(dir.path(), PartitionLayout::DistanceBin, 50.0)
            .write(vec![record])
            .unwrap();
        let store = StoreHandle::open(dir.path(), None).unwrap();
        let engine = QueryEngine::new(CatalogConfig::default()).unwrap();
        (dir, store, engine)
    }

    #[test]
    fn test_hit_returns_same_arc() {
        let (_dir, store, engine) = fixture();
        let cache = QueryCache::new(&CacheConfig::default());
        let spec = QuerySpec::sphere(Vector3::zeros(), 20.0).build();
        let a = cache.get_or_execute(&engine, &store, &spec);
        let b = cache.get_or_execute(&engine, &store, &spec);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_epochs_are_distinct_entries() {
        let (_dir, store, engine) = fixture();
        let cache = QueryCache::new(&CacheConfig::default());
        let a = cache.get_or_execute(&engine, &store, &QuerySpec::sphere(Vector3::zeros(), 20.0).build());
        let b = cache.get_or_execute(
            &engine,
            &store,
            &QuerySpec::sphere(Vector3::zeros(), 20.0).epoch(2020.0).build(),
        );
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.stars[0].y, 4.0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_expire() {
        let (_dir, store, engine) = fixture();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let config = CacheConfig {
            capacity: 8,
            ttl_secs: 10,
        };
        let cache = QueryCache::with_clock(&config, clock.clone());
        let spec = QuerySpec::sphere(Vector3::zeros(), 20.0).build();
        let a = cache.get_or_execute(&engine, &store, &spec);
        clock.advance(Duration::from_secs(11));
        let b = cache.get_or_execute(&engine, &store, &spec);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let (_dir, store, engine) = fixture();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let config = CacheConfig {
            capacity: 2,
            ttl_secs: 300,
        };
        let cache = QueryCache::with_clock(&config, clock.clone());
        let spec = |seed| QuerySpec::sphere(Vector3::zeros(), 20.0).uniform(seed).build();
        let first = cache.get_or_execute(&engine, &store, &spec(1));
        clock.advance(Duration::from_secs(1));
        cache.get_or_execute(&engine, &store, &spec(2));
        clock.advance(Duration::from_secs(1));
        cache.get_or_execute(&engine, &store, &spec(3));
        assert_eq!(cache.len(), 2);
        let again = cache.get_or_execute(&engine, &store, &spec(1));
        assert!(!Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_zero_capacity_never_stores() {
        let (_dir, store, engine) = fixture();
        let config = CacheConfig {
            capacity: 0,
            ttl_secs: 300,
        };
        let cache = QueryCache::new(&config);
        cache.get_or_execute(&engine, &store, &QuerySpec::sphere(Vector3::zeros(), 20.0).build());
        assert!(cache.is_empty());
    }
}
