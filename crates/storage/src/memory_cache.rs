//! In-process LRU cache of resolved granules.
//!
//! Bounded by entry count. Each entry carries its own `expires_at`; expired
//! entries are dropped when they are looked up and never returned.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use metrics::counter;
use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::{CacheEntry, CacheKey, GranuleCache};
use crate::CacheResult;

/// Cache statistics.
#[derive(Debug, Default)]
pub struct MemoryCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub expired: AtomicU64,
    pub evictions: AtomicU64,
}

impl MemoryCacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits + self.misses.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            (hits / total) * 100.0
        }
    }
}

pub struct MemoryGranuleCache {
    cache: Arc<RwLock<LruCache<String, CacheEntry>>>,
    stats: Arc<MemoryCacheStats>,
}

impl MemoryGranuleCache {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(capacity))),
            stats: Arc::new(MemoryCacheStats::default()),
        }
    }

    /// Lookup against an explicit clock.
    pub async fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        // Write lock: a hit updates LRU order
        let mut cache = self.cache.write().await;

        let expired = match cache.get(key.as_str()) {
            Some(entry) if !entry.is_expired_at(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                counter!("granule_cache_requests_total", "backend" => "memory", "result" => "hit").increment(1);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            cache.pop(key.as_str());
            self.stats.expired.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Dropped expired cache entry");
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        counter!("granule_cache_requests_total", "backend" => "memory", "result" => "miss").increment(1);
        None
    }

    /// Insert against an explicit clock. Entries that are already expired are ignored.
    pub async fn put_at(&self, entry: CacheEntry, now: DateTime<Utc>) {
        if entry.is_expired_at(now) {
            return;
        }
        let mut cache = self.cache.write().await;
        if let Some((evicted_key, _)) = cache.push(entry.key.clone(), entry) {
            // push returns the old value for a replaced key too
            if !cache.contains(&evicted_key) {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> &MemoryCacheStats {
        &self.stats
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }
}

#[async_trait]
impl GranuleCache for MemoryGranuleCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.get_at(key, Utc::now()).await)
    }

    async fn put(&self, entry: CacheEntry) -> CacheResult<()> {
        self.put_at(entry, Utc::now()).await;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
