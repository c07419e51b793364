//! CMR-style granule search client.

use std::cmp::Reverse;

use async_trait::async_trait;
use geo_common::{BoundingBox, TimeWindow};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use upstream::UpstreamClient;

use crate::{CatalogError, CatalogOutcome, CmrResponse, GranuleSource};

/// Hard ceiling on page size regardless of configuration.
const MAX_PAGE_SIZE: u32 = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Search API root, e.g. `https://cmr.earthdata.nasa.gov/search`
    pub base_url: String,
    pub collection_id: String,
    pub page_size: u32,
    pub max_pages: u32,
    /// Preferred raster asset, e.g. `_LST.tif`
    pub asset_suffix: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://cmr.earthdata.nasa.gov/search".to_string(),
            collection_id: String::new(),
            page_size: 100,
            max_pages: 5,
            asset_suffix: None,
        }
    }
}

/// Queries the granule catalog through the shared upstream client.
#[derive(Clone)]
pub struct CatalogClient {
    upstream: UpstreamClient,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(upstream: UpstreamClient, config: CatalogConfig) -> Self {
        Self { upstream, config }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn search_url(&self) -> String {
        format!("{}/granules.json", self.config.base_url.trim_end_matches('/'))
    }

    fn page_params(&self, bbox: &BoundingBox, window: &TimeWindow, page: u32) -> Vec<(String, String)> {
        vec![
            ("collection_concept_id".into(), self.config.collection_id.clone()),
            (
                "bounding_box".into(),
                format!("{},{},{},{}", bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y),
            ),
            ("temporal".into(), window.to_query_interval()),
            ("page_size".into(), self.page_size().to_string()),
            ("page_num".into(), page.to_string()),
            ("sort_key".into(), "-start_date".into()),
        ]
    }

    fn page_size(&self) -> u32 {
        self.config.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    /// Page through results up to `max_pages`.
    ///
    /// A failing page ends pagination; records from earlier pages are kept
    /// and the failure is reported alongside them.
    #[instrument(skip(self), fields(collection = %self.config.collection_id))]
    pub async fn search(&self, bbox: &BoundingBox, window: &TimeWindow) -> CatalogOutcome {
        let url = self.search_url();
        let page_size = self.page_size() as usize;
        let asset_suffix = self.config.asset_suffix.as_deref();
        let mut outcome = CatalogOutcome::default();

        for page in 1..=self.config.max_pages.max(1) {
            counter!("catalog_requests_total").increment(1);
            let params = self.page_params(bbox, window, page);

            let response: CmrResponse = match self.upstream.get_json(&url, &params).await {
                Ok(r) => r,
                Err(e) => {
                    counter!("catalog_failures_total", "class" => e.class()).increment(1);
                    warn!(page, error = %e, "Catalog page failed");
                    outcome.failure = Some(CatalogError::Upstream(e));
                    break;
                }
            };
            outcome.pages_fetched = page;

            let entries = response.into_entries();
            let received = entries.len();
            for entry in entries {
                match entry.validate(asset_suffix) {
                    Ok(record) => outcome.records.push(record),
                    Err(e) => {
                        debug!(error = %e, "Dropping catalog entry");
                        outcome.malformed += 1;
                    }
                }
            }

            if received < page_size {
                break;
            }
        }

        // Stable across calls: newest first, ties broken by id.
        outcome
            .records
            .sort_by(|a, b| (Reverse(a.acquired), &a.id).cmp(&(Reverse(b.acquired), &b.id)));
        outcome.records.dedup_by(|a, b| a.id == b.id);

        info!(
            records = outcome.records.len(),
            malformed = outcome.malformed,
            pages = outcome.pages_fetched,
            failed = outcome.is_failed(),
            "Catalog search complete"
        );
        outcome
    }
}

#[async_trait]
impl GranuleSource for CatalogClient {
    async fn search(&self, bbox: &BoundingBox, window: &TimeWindow) -> CatalogOutcome {
        CatalogClient::search(self, bbox, window).await
    }
}
