use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::routing::RoutingResult;

/// Cache key for routing decisions: a normalized prefix of the request text
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Lowercase, collapse whitespace, keep the first `prefix_chars` characters
    pub fn new(text: &str, prefix_chars: usize) -> Self {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self(normalized.chars().take(prefix_chars).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Bounded cache of routing results.
///
/// Eviction is moka's size-bounded TinyLFU policy rather than insertion order.
#[derive(Debug, Clone)]
pub struct RoutingCache {
    cache: Cache<CacheKey, Arc<RoutingResult>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl RoutingCache {
    /// Create a new cache holding at most `max_capacity` routing results
    pub fn new(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a cached routing result if available
    pub fn get(&self, key: &CacheKey) -> Option<Arc<RoutingResult>> {
        let result = self.cache.get(key);
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    pub fn put(&self, key: CacheKey, result: RoutingResult) {
        self.cache.insert(key, Arc::new(result));
    }

    /// Check presence without touching hit/miss counters
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            entry_count: self.cache.entry_count(),
            hits,
            misses,
            hit_rate,
        }
    }

    /// Clear all cache entries
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    #[cfg(test)]
    fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of entries in the cache
    pub entry_count: u64,
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}
