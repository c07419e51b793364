//! Granule discovery: request parsing, cache consult, selection and the
//! `status`-tagged response.

use std::sync::Arc;
use std::time::Duration;

use catalog::{GranuleSelector, NearestCandidate, SelectionDiagnostics, SelectionStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use geo_common::time::parse_iso8601;
use geo_common::{BoundingBox, GeoError, GeoResult, GranuleFilters, RegionQuery, ScoredGranule, TimeWindow};
use metrics::counter;
use serde::{Deserialize, Serialize};
use storage::{CacheEntry, CacheKey, GranuleCache};
use tracing::{debug, instrument, warn};

use crate::config::{SelectionSection, MAX_GRANULES_LIMIT};

/// Raw query parameters. Everything is text so that bad values produce our
/// own 400 body rather than the extractor's.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryParams {
    pub lat: Option<String>,
    pub lon: Option<String>,
    #[serde(alias = "regionBbox")]
    pub bbox: Option<String>,
    #[serde(alias = "date_from")]
    pub date_from: Option<String>,
    #[serde(alias = "date_to")]
    pub date_to: Option<String>,
    #[serde(alias = "minQualityThreshold", alias = "min_quality")]
    pub min_quality: Option<String>,
    #[serde(alias = "daytime_only")]
    pub daytime_only: Option<String>,
    #[serde(alias = "max_granules")]
    pub max_granules: Option<String>,
    #[serde(alias = "max_cloud")]
    pub max_cloud: Option<String>,
}

fn parse_f64(name: &str, raw: Option<&str>) -> GeoResult<Option<f64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| GeoError::invalid(name, format!("'{}' is not a number", s))),
    }
}

fn parse_bool(name: &str, raw: Option<&str>) -> GeoResult<Option<bool>> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(None),
        Some("1" | "true" | "yes") => Ok(Some(true)),
        Some("0" | "false" | "no") => Ok(Some(false)),
        Some(other) => Err(GeoError::invalid(name, format!("'{}' is not a boolean", other))),
    }
}

impl DiscoveryParams {
    /// Validate into a query. Missing optional values take the configured defaults.
    pub fn into_query(self, defaults: &SelectionSection, now: DateTime<Utc>) -> GeoResult<RegionQuery> {
        let lat = parse_f64("lat", self.lat.as_deref())?.ok_or_else(|| GeoError::MissingParameter("lat".into()))?;
        let lon = parse_f64("lon", self.lon.as_deref())?.ok_or_else(|| GeoError::MissingParameter("lon".into()))?;

        let region = match self.bbox.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(BoundingBox::from_query_string(raw)?),
            None => None,
        };

        let from = self.date_from.as_deref().filter(|s| !s.trim().is_empty()).map(parse_iso8601).transpose()?;
        let to = self.date_to.as_deref().filter(|s| !s.trim().is_empty()).map(parse_iso8601).transpose()?;
        let open_ended = from.is_some() && to.is_none();
        let window = match (from, to) {
            (None, None) => None,
            (Some(from), to) => {
                let to = to.unwrap_or(now);
                if from > to {
                    return Err(GeoError::invalid("dateFrom", "must not be after dateTo"));
                }
                Some(TimeWindow::new(from, to))
            }
            (None, Some(_)) => return Err(GeoError::MissingParameter("dateFrom".into())),
        };

        let mut filters = GranuleFilters {
            max_granules: defaults.max_granules,
            max_cloud_percent: defaults.max_cloud_percent,
            ..GranuleFilters::default()
        };
        if let Some(q) = parse_f64("minQuality", self.min_quality.as_deref())? {
            filters.min_quality = q;
        }
        if let Some(d) = parse_bool("daytimeOnly", self.daytime_only.as_deref())? {
            filters.daytime_only = d;
        }
        if let Some(c) = parse_f64("maxCloud", self.max_cloud.as_deref())? {
            if !(0.0..=100.0).contains(&c) {
                return Err(GeoError::invalid("maxCloud", "must be within [0, 100]"));
            }
            filters.max_cloud_percent = c;
        }
        if let Some(raw) = self.max_granules.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let n: usize = raw
                .parse()
                .map_err(|_| GeoError::invalid("maxGranules", format!("'{}' is not a count", raw)))?;
            if n == 0 || n > MAX_GRANULES_LIMIT {
                return Err(GeoError::invalid(
                    "maxGranules",
                    format!("must be within 1..={}", MAX_GRANULES_LIMIT),
                ));
            }
            filters.max_granules = n;
        }

        let query = RegionQuery::new(lat, lon, region, window, filters, defaults.region_half_extent_deg)?;
        Ok(if open_ended { query.with_open_ended_window() } else { query })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GranuleView {
    pub id: String,
    /// First raster link; `None` when the granule has no GeoTIFF asset
    pub url: Option<String>,
    pub datetime: String,
    /// `[minLon, minLat, maxLon, maxLat]`
    pub bounds: [f64; 4],
    pub quality_score: f64,
    pub coverage_percent: f64,
    pub cloud_percent: f64,
    pub footprint_approximate: bool,
}

impl From<&ScoredGranule> for GranuleView {
    fn from(s: &ScoredGranule) -> Self {
        Self {
            id: s.granule.id.clone(),
            url: s.granule.data_links.first().cloned(),
            datetime: s.granule.acquired.to_rfc3339_opts(SecondsFormat::Secs, true),
            bounds: s.granule.footprint.to_array(),
            quality_score: round3(s.quality_score),
            coverage_percent: round3(s.coverage_percent()),
            cloud_percent: round3(s.cloud_percent()),
            footprint_approximate: s.granule.footprint_approximate,
        }
    }
}

impl From<&CacheEntry> for GranuleView {
    fn from(e: &CacheEntry) -> Self {
        Self {
            id: e.granule_id.clone(),
            url: Some(e.raster_url.clone()),
            datetime: e.acquired.to_rfc3339_opts(SecondsFormat::Secs, true),
            bounds: e.footprint.to_array(),
            quality_score: e.quality_score,
            coverage_percent: e.coverage_percent,
            cloud_percent: e.cloud_percent,
            footprint_approximate: e.footprint_approximate,
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestView {
    pub id: String,
    pub distance_km: f64,
    pub bounds: [f64; 4],
}

impl From<&NearestCandidate> for NearestView {
    fn from(n: &NearestCandidate) -> Self {
        Self {
            id: n.granule_id.clone(),
            distance_km: (n.distance_km * 10.0).round() / 10.0,
            bounds: n.footprint.to_array(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscoveryResponse {
    #[serde(rename_all = "camelCase")]
    Match {
        granules: Vec<GranuleView>,
        /// Kept for consumers that only read one granule
        best: GranuleView,
        candidates_checked: usize,
        cached: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostics: Option<SelectionDiagnostics>,
    },
    #[serde(rename_all = "camelCase")]
    NoCoverage {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        nearest: Option<NearestView>,
        candidates_checked: usize,
        diagnostics: SelectionDiagnostics,
    },
    Error {
        message: String,
    },
}

impl DiscoveryResponse {
    pub fn error(message: impl Into<String>) -> Self {
        DiscoveryResponse::Error {
            message: message.into(),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            DiscoveryResponse::Match { .. } => "match",
            DiscoveryResponse::NoCoverage { .. } => "no_coverage",
            DiscoveryResponse::Error { .. } => "error",
        }
    }
}

pub struct DiscoveryService {
    selector: GranuleSelector,
    cache: Arc<dyn GranuleCache>,
    collection: String,
    cache_ttl: Duration,
}

impl DiscoveryService {
    pub fn new(selector: GranuleSelector, cache: Arc<dyn GranuleCache>, collection: String, cache_ttl: Duration) -> Self {
        Self {
            selector,
            cache,
            collection,
            cache_ttl,
        }
    }

    /// A cached best granule answers immediately; otherwise run selection and
    /// remember its best granule. Cache failures never fail the request.
    #[instrument(skip(self, query), fields(lat = query.centroid_lat, lon = query.centroid_lon))]
    pub async fn discover(&self, query: &RegionQuery, now: DateTime<Utc>) -> DiscoveryResponse {
        let key = CacheKey::for_query(&self.collection, query);

        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, granule = %entry.granule_id, "Discovery cache hit");
                let view = GranuleView::from(&entry);
                return DiscoveryResponse::Match {
                    granules: vec![view.clone()],
                    best: view,
                    candidates_checked: 0,
                    cached: true,
                    diagnostics: None,
                };
            }
            Ok(None) => {}
            Err(e) => {
                counter!("granule_cache_errors_total", "op" => "get", "backend" => self.cache.backend()).increment(1);
                warn!(error = %e, backend = self.cache.backend(), "Cache lookup failed");
            }
        }

        let outcome = self.selector.select(query, now).await;
        match outcome.status() {
            SelectionStatus::Error(message) => DiscoveryResponse::error(message),
            SelectionStatus::NoCoverage => DiscoveryResponse::NoCoverage {
                message: no_coverage_message(query, outcome.candidates_checked()),
                nearest: outcome.nearest.as_ref().map(NearestView::from),
                candidates_checked: outcome.candidates_checked(),
                diagnostics: outcome.diagnostics,
            },
            SelectionStatus::Match => {
                let Some(top) = outcome.best() else {
                    return DiscoveryResponse::error("selection returned no granules");
                };
                self.remember(&key, top, now).await;
                let best = GranuleView::from(top);
                let granules = outcome.granules.iter().map(GranuleView::from).collect();
                DiscoveryResponse::Match {
                    granules,
                    best,
                    candidates_checked: outcome.candidates_checked(),
                    cached: false,
                    diagnostics: Some(outcome.diagnostics),
                }
            }
        }
    }

    /// Best-effort upsert.
    async fn remember(&self, key: &CacheKey, best: &ScoredGranule, now: DateTime<Utc>) {
        let Some(raster_url) = best.granule.data_links.first() else {
            return;
        };
        let Ok(ttl) = chrono::Duration::from_std(self.cache_ttl) else {
            return;
        };
        let entry = CacheEntry {
            key: key.to_string(),
            granule_id: best.granule.id.clone(),
            raster_url: raster_url.clone(),
            footprint: best.granule.footprint,
            expires_at: now + ttl,
            acquired: best.granule.acquired,
            quality_score: round3(best.quality_score),
            coverage_percent: round3(best.coverage_percent()),
            cloud_percent: round3(best.cloud_percent()),
            footprint_approximate: best.granule.footprint_approximate,
        };
        if let Err(e) = self.cache.put(entry).await {
            counter!("granule_cache_errors_total", "op" => "put", "backend" => self.cache.backend()).increment(1);
            warn!(error = %e, backend = self.cache.backend(), "Cache write failed");
        }
    }
}

fn no_coverage_message(query: &RegionQuery, checked: usize) -> String {
    if checked == 0 {
        format!(
            "No granules found near ({:.4}, {:.4}) in the searched time range",
            query.centroid_lat, query.centroid_lon
        )
    } else {
        format!(
            "None of {} candidate granules covers ({:.4}, {:.4}) with the requested filters",
            checked, query.centroid_lat, query.centroid_lon
        )
    }
}
