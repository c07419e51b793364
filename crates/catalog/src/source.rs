//! The seam between the selector and whatever answers catalog queries.

use async_trait::async_trait;
use geo_common::{BoundingBox, TimeWindow};

use crate::{CatalogError, CatalogRecord};

/// Result of one catalog query. Never an `Err`: a failure keeps whatever
/// records arrived before it.
#[derive(Debug, Default)]
pub struct CatalogOutcome {
    pub records: Vec<CatalogRecord>,
    /// Entries dropped at validation
    pub malformed: usize,
    pub pages_fetched: u32,
    pub failure: Option<CatalogError>,
}

impl CatalogOutcome {
    pub fn failed(error: CatalogError) -> Self {
        Self {
            failure: Some(error),
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[async_trait]
pub trait GranuleSource: Send + Sync {
    /// Records whose coverage may intersect `bbox` within `window`,
    /// most recent first.
    async fn search(&self, bbox: &BoundingBox, window: &TimeWindow) -> CatalogOutcome;
}
