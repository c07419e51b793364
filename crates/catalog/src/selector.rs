//! The granule selection pipeline.
//!
//! One catalog query per time window runs concurrently, each under its own
//! timeout. Results from the branches that finished are merged, then every
//! record goes through footprint resolution, the daytime and cloud filters,
//! the eligibility test and scoring before ranking.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use geo_common::time::warm_season_windows;
use geo_common::{haversine_km, BoundingBox, Granule, RegionQuery, ScoredGranule, TimeWindow};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::scoring::{solar_local_hour, DaytimeBand, QualityScorer};
use crate::{CatalogError, CatalogOutcome, CatalogRecord, Footprint, GranuleSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub daytime: DaytimeBand,
    /// First month of the warm season (1-12)
    pub warm_season_start_month: u32,
    /// Last month of the warm season, inclusive
    pub warm_season_end_month: u32,
    /// Number of recent warm seasons searched when no window is given
    pub warm_season_years: u32,
    /// Per-window catalog timeout
    #[serde(with = "duration_secs")]
    pub window_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            daytime: DaytimeBand::default(),
            warm_season_start_month: 6,
            warm_season_end_month: 8,
            warm_season_years: 3,
            window_timeout: Duration::from_secs(15),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Counters describing how candidates were consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionDiagnostics {
    pub windows_queried: usize,
    pub failed_windows: usize,
    /// Distinct records returned by the catalog
    pub seen: usize,
    pub malformed: usize,
    pub no_bounds: usize,
    pub approximate_footprints: usize,
    pub time_filtered: usize,
    pub cloud_filtered: usize,
    pub no_intersect: usize,
    pub below_quality: usize,
}

/// The closest candidate that did not intersect the region. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearestCandidate {
    pub granule_id: String,
    pub distance_km: f64,
    pub footprint: BoundingBox,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionStatus {
    Match,
    NoCoverage,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Ranked by quality, best first
    pub granules: Vec<ScoredGranule>,
    pub diagnostics: SelectionDiagnostics,
    pub nearest: Option<NearestCandidate>,
    pub first_error: Option<String>,
}

impl SelectionOutcome {
    /// Error only when every window failed and nothing came back at all.
    pub fn status(&self) -> SelectionStatus {
        let d = &self.diagnostics;
        if !self.granules.is_empty() {
            SelectionStatus::Match
        } else if d.windows_queried > 0 && d.failed_windows == d.windows_queried && d.seen == 0 {
            SelectionStatus::Error(
                self.first_error
                    .clone()
                    .unwrap_or_else(|| "catalog unavailable".to_string()),
            )
        } else {
            SelectionStatus::NoCoverage
        }
    }

    pub fn candidates_checked(&self) -> usize {
        self.diagnostics.seen
    }

    pub fn best(&self) -> Option<&ScoredGranule> {
        self.granules.first()
    }
}

pub struct GranuleSelector {
    source: Arc<dyn GranuleSource>,
    config: SelectorConfig,
}

impl GranuleSelector {
    pub fn new(source: Arc<dyn GranuleSource>, config: SelectorConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// The windows searched for `query`: its explicit window, or recent warm seasons.
    pub fn windows_for(&self, query: &RegionQuery, now: DateTime<Utc>) -> Vec<TimeWindow> {
        match query.window {
            Some(w) => vec![w],
            None => warm_season_windows(
                now,
                self.config.warm_season_years,
                self.config.warm_season_start_month,
                self.config.warm_season_end_month,
            ),
        }
    }

    #[instrument(skip(self, query), fields(lat = query.centroid_lat, lon = query.centroid_lon))]
    pub async fn select(&self, query: &RegionQuery, now: DateTime<Utc>) -> SelectionOutcome {
        let windows = self.windows_for(query, now);
        let search_box = query
            .region
            .union(&BoundingBox::new(query.centroid_lon, query.centroid_lat, query.centroid_lon, query.centroid_lat));

        let branches = windows.iter().map(|w| {
            let source = Arc::clone(&self.source);
            let timeout = self.config.window_timeout;
            async move {
                match tokio::time::timeout(timeout, source.search(&search_box, w)).await {
                    Ok(outcome) => outcome,
                    Err(_) => CatalogOutcome::failed(CatalogError::Timeout(timeout.as_millis() as u64)),
                }
            }
        });
        let outcomes = join_all(branches).await;

        let mut diagnostics = SelectionDiagnostics {
            windows_queried: windows.len(),
            ..Default::default()
        };
        let mut first_error = None;
        let mut records = Vec::new();
        for (window, outcome) in windows.iter().zip(outcomes) {
            diagnostics.malformed += outcome.malformed;
            if let Some(err) = &outcome.failure {
                diagnostics.failed_windows += 1;
                warn!(window = %window.to_query_interval(), error = %err, "Catalog window failed");
                first_error.get_or_insert_with(|| err.to_string());
            }
            records.extend(outcome.records);
        }

        let overall = windows
            .iter()
            .copied()
            .reduce(|a, b| a.span(&b))
            .unwrap_or_else(|| TimeWindow::new(now, now));

        let mut outcome = self.rank(query, overall, dedupe(records), diagnostics);
        outcome.first_error = first_error;

        counter!("selection_requests_total", "status" => status_label(&outcome.status())).increment(1);
        info!(
            selected = outcome.granules.len(),
            seen = outcome.diagnostics.seen,
            failed_windows = outcome.diagnostics.failed_windows,
            "Granule selection complete"
        );
        outcome
    }

    /// Filter, score, sort and cap merged records.
    pub fn rank(
        &self,
        query: &RegionQuery,
        overall: TimeWindow,
        records: Vec<CatalogRecord>,
        mut diagnostics: SelectionDiagnostics,
    ) -> SelectionOutcome {
        let filters = &query.filters;
        let scorer = QualityScorer::new(query, overall);
        let mut nearest: Option<NearestCandidate> = None;
        let mut scored = Vec::new();

        for record in records {
            diagnostics.seen += 1;

            let footprint = Footprint::resolve(&record);
            let Some(bbox) = footprint.bbox() else {
                diagnostics.no_bounds += 1;
                continue;
            };
            if footprint.is_approximate() {
                diagnostics.approximate_footprints += 1;
            }

            if filters.daytime_only {
                let hour = solar_local_hour(record.acquired, query.centroid_lon);
                if !self.config.daytime.contains(hour) {
                    diagnostics.time_filtered += 1;
                    continue;
                }
            }

            if matches!(record.cloud_cover_percent, Some(c) if c > filters.max_cloud_percent) {
                diagnostics.cloud_filtered += 1;
                continue;
            }

            if !query.is_eligible(&bbox) {
                diagnostics.no_intersect += 1;
                let (cx, cy) = bbox.center();
                let distance_km = haversine_km(query.centroid_lat, query.centroid_lon, cy, cx);
                if nearest.as_ref().map_or(true, |n| distance_km < n.distance_km) {
                    nearest = Some(NearestCandidate {
                        granule_id: record.id.clone(),
                        distance_km,
                        footprint: bbox,
                    });
                }
                continue;
            }

            let candidate = scorer.score(Granule {
                id: record.id,
                title: record.title,
                acquired: record.acquired,
                cloud_cover_percent: record.cloud_cover_percent,
                footprint: bbox,
                footprint_approximate: footprint.is_approximate(),
                data_links: record.data_links,
            });

            if candidate.quality_score < filters.min_quality {
                diagnostics.below_quality += 1;
                continue;
            }
            scored.push(candidate);
        }

        scored.sort_by(|a, b| {
            b.quality_score
                .total_cmp(&a.quality_score)
                .then_with(|| b.granule.acquired.cmp(&a.granule.acquired))
                .then_with(|| a.granule.id.cmp(&b.granule.id))
        });
        scored.truncate(filters.max_granules);

        debug!(?diagnostics, "Ranked candidates");

        SelectionOutcome {
            granules: scored,
            diagnostics,
            nearest,
            first_error: None,
        }
    }
}

fn dedupe(records: Vec<CatalogRecord>) -> Vec<CatalogRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

fn status_label(status: &SelectionStatus) -> &'static str {
    match status {
        SelectionStatus::Match => "match",
        SelectionStatus::NoCoverage => "no_coverage",
        SelectionStatus::Error(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_durations() {
        let config: SelectorConfig =
            serde_json::from_str(r#"{"window_timeout": 2.5, "warm_season_years": 2}"#).unwrap();
        assert_eq!(config.window_timeout, Duration::from_millis(2500));
        assert_eq!(config.warm_season_years, 2);
        assert_eq!(config.warm_season_start_month, 6);
    }

    #[test]
    fn test_status_all_windows_failed() {
        let outcome = SelectionOutcome {
            granules: vec![],
            diagnostics: SelectionDiagnostics {
                windows_queried: 2,
                failed_windows: 2,
                ..Default::default()
            },
            nearest: None,
            first_error: Some("boom".into()),
        };
        assert_eq!(outcome.status(), SelectionStatus::Error("boom".into()));
    }

    #[test]
    fn test_status_partial_failure_is_no_coverage() {
        let outcome = SelectionOutcome {
            granules: vec![],
            diagnostics: SelectionDiagnostics {
                windows_queried: 2,
                failed_windows: 1,
                ..Default::default()
            },
            nearest: None,
            first_error: Some("boom".into()),
        };
        assert_eq!(outcome.status(), SelectionStatus::NoCoverage);
    }
}
