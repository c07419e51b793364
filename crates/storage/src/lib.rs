//! Cache adapters for resolved granule metadata.
//!
//! Two backends implement [`GranuleCache`]:
//! - [`MemoryGranuleCache`]: bounded in-process LRU with per-entry expiry
//! - [`RedisGranuleCache`]: JSON values in Redis, expired by the server

pub mod cache;
pub mod error;
pub mod memory_cache;

pub use cache::{CacheEntry, CacheKey, GranuleCache, RedisGranuleCache};
pub use error::{CacheError, CacheResult};
pub use memory_cache::{MemoryCacheStats, MemoryGranuleCache};
