//! The granule cache boundary and its Redis backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo_common::{BoundingBox, RegionQuery};
use metrics::counter;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::CacheResult;

/// The best granule resolved for one discovery query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub granule_id: String,
    pub raster_url: String,
    pub footprint: BoundingBox,
    pub expires_at: DateTime<Utc>,
    pub acquired: DateTime<Utc>,
    pub quality_score: f64,
    pub coverage_percent: f64,
    pub cloud_percent: f64,
    /// Footprint was derived from the granule identifier, not catalog geometry
    #[serde(default)]
    pub footprint_approximate: bool,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whole seconds left before expiry, or `None` if already expired.
    pub fn ttl_secs_at(&self, now: DateTime<Utc>) -> Option<u64> {
        let secs = (self.expires_at - now).num_seconds();
        (secs > 0).then_some(secs as u64)
    }
}

/// Read-then-upsert storage for resolved granules.
///
/// `get` never returns an expired entry. `put` replaces any entry under the
/// same key.
#[async_trait]
pub trait GranuleCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    async fn put(&self, entry: CacheEntry) -> CacheResult<()>;

    /// Short backend name for logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Stable composite key for a discovery query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub const PREFIX: &'static str = "granule:";

    /// Everything that can change the selection result goes into the key.
    /// Coordinates are rounded so float noise does not split entries.
    pub fn for_query(collection: &str, query: &RegionQuery) -> Self {
        // An open-ended window ends at request time; keying on that would
        // never hit, so only its start counts.
        let window = match query.window {
            Some(w) if query.window_open_ended => format!("{},open", w.start.format("%Y-%m-%dT%H:%M:%SZ")),
            Some(w) => w.to_query_interval(),
            None => "warm-season".to_string(),
        };
        let f = &query.filters;
        Self(format!(
            "{}{}:{:.4},{:.4}:{}:{}:d{}:q{:.3}:c{:.1}",
            Self::PREFIX,
            collection,
            query.centroid_lat,
            query.centroid_lon,
            query.region.cache_key(),
            window,
            u8::from(f.daytime_only),
            f.min_quality,
            f.max_cloud_percent,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Redis-backed granule cache. Values are JSON; expiry is set with `SET EX`.
#[derive(Clone)]
pub struct RedisGranuleCache {
    conn: MultiplexedConnection,
}

impl RedisGranuleCache {
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl GranuleCache for RedisGranuleCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.as_str()).await?;
        let Some(raw) = raw else {
            counter!("granule_cache_requests_total", "backend" => "redis", "result" => "miss").increment(1);
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                // Unreadable values are treated as absent and overwritten on the next put
                warn!(key = %key, error = %e, "Discarding malformed cache value");
                counter!("granule_cache_requests_total", "backend" => "redis", "result" => "malformed").increment(1);
                return Ok(None);
            }
        };

        // Redis expiry has second granularity
        if entry.is_expired_at(Utc::now()) {
            counter!("granule_cache_requests_total", "backend" => "redis", "result" => "expired").increment(1);
            return Ok(None);
        }
        counter!("granule_cache_requests_total", "backend" => "redis", "result" => "hit").increment(1);
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> CacheResult<()> {
        let Some(ttl) = entry.ttl_secs_at(Utc::now()) else {
            debug!(key = %entry.key, "Skipping already expired cache entry");
            return Ok(());
        };
        let value = serde_json::to_string(&entry)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&entry.key, value, ttl).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
