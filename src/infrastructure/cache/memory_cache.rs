//! In-memory LRU image cache bounded by cost and count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CachedImage;
use crate::domain::ports::MemoryCachePort;
use crate::infrastructure::config::CacheConfig;

/// Weak records are pruned once they outnumber strong entries by this factor.
const WEAK_PRUNE_FACTOR: usize = 2;
/// Weak tables smaller than this are never pruned.
const WEAK_PRUNE_MIN: usize = 64;

struct Entry {
    image: Arc<CachedImage>,
    cost: u64,
}

struct Inner {
    entries: LruCache<String, Entry>,
    total_cost: u64,
    weak: HashMap<String, (Weak<CachedImage>, u64)>,
}

/// In-memory cache for decoded images.
///
/// Ceilings of `0` are unlimited. Eviction pops the least recently used entry
/// until both ceilings hold. With weak retention enabled, every stored image
/// is also tracked weakly so an evicted entry that is still alive elsewhere is
/// put back on the next `get`.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_cost: u64,
    max_count: usize,
    weak_retention: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache with the given ceilings.
    #[must_use]
    pub fn new(max_cost: u64, max_count: usize, weak_retention: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_cost: 0,
                weak: HashMap::new(),
            }),
            max_cost,
            max_count,
            weak_retention,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache from the memory settings of `config`.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.max_memory_cost,
            config.max_memory_count,
            config.should_use_weak_memory_cache,
        )
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            total_cost: inner.total_cost,
        }
    }

    /// Peeks at an image without promoting it in the LRU order.
    pub fn peek(&self, key: &str) -> Option<Arc<CachedImage>> {
        self.inner.lock().entries.peek(key).map(|e| e.image.clone())
    }

    fn over_limit(&self, inner: &Inner) -> bool {
        (self.max_count > 0 && inner.entries.len() > self.max_count)
            || (self.max_cost > 0 && inner.total_cost > self.max_cost)
    }

    fn insert_locked(&self, inner: &mut Inner, key: &str, image: Arc<CachedImage>, cost: u64) {
        if let Some(old) = inner.entries.put(key.to_string(), Entry { image, cost }) {
            inner.total_cost -= old.cost;
        }
        inner.total_cost += cost;

        while self.over_limit(inner) {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= entry.cost;
            trace!(key = %evicted, cost = entry.cost, "Evicted image from memory cache");
        }
    }

    fn prune_weak(inner: &mut Inner) {
        let limit = (inner.entries.len() * WEAK_PRUNE_FACTOR).max(WEAK_PRUNE_MIN);
        if inner.weak.len() > limit {
            inner.weak.retain(|_, (weak, _)| weak.strong_count() > 0);
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Summed cost of cached images.
    pub total_cost: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images ({} bytes), {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.total_cost, self.hit_rate, self.hits, self.misses
        )
    }
}

impl MemoryCachePort for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<CachedImage>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            let image = entry.image.clone();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Memory cache hit");
            return Some(image);
        }

        if self.weak_retention {
            let revived = inner
                .weak
                .get(key)
                .and_then(|(weak, cost)| weak.upgrade().map(|image| (image, *cost)));
            match revived {
                Some((image, cost)) => {
                    self.insert_locked(&mut inner, key, image.clone(), cost);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Recovered image from weak memory table");
                    return Some(image);
                }
                None => {
                    inner.weak.remove(key);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key, "Memory cache miss");
        None
    }

    fn set(&self, key: &str, image: Arc<CachedImage>, cost: u64) {
        let mut inner = self.inner.lock();
        if self.weak_retention {
            inner
                .weak
                .insert(key.to_string(), (Arc::downgrade(&image), cost));
            Self::prune_weak(&mut inner);
        }
        self.insert_locked(&mut inner, key, image, cost);
        trace!(key, cost, "Stored image in memory cache");
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.weak.remove(key);
        if let Some(entry) = inner.entries.pop(key) {
            inner.total_cost -= entry.cost;
            debug!(key, "Removed image from memory cache");
        }
    }

    fn remove_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.weak.clear();
        inner.total_cost = 0;
        debug!("Cleared memory image cache");
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }
}
