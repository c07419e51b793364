//! Quality scoring for candidate granules.
//!
//! The score is a proxy for usable signal: decoding every candidate raster
//! to count valid pixels would be far too slow at search time.

use chrono::{DateTime, Timelike, Utc};
use geo_common::{BoundingBox, Granule, RegionQuery, ScoredGranule, TimeWindow};
use serde::{Deserialize, Serialize};

pub const COVERAGE_WEIGHT: f64 = 0.4;
pub const VALID_WEIGHT: f64 = 0.3;
pub const CLEAR_SKY_WEIGHT: f64 = 0.2;
pub const RECENCY_WEIGHT: f64 = 0.1;

/// Cloud ratio assumed when the catalog reports none.
pub const UNKNOWN_CLOUD_RATIO: f64 = 0.5;

/// Fraction of a cloudy pixel assumed lost.
const CLOUD_LOSS_FACTOR: f64 = 0.8;

/// Solar-local hours counted as daytime, `[start, end)`. A band with
/// `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DaytimeBand {
    pub start_hour: f64,
    pub end_hour: f64,
}

impl Default for DaytimeBand {
    fn default() -> Self {
        Self {
            start_hour: 10.0,
            end_hour: 16.0,
        }
    }
}

impl DaytimeBand {
    pub fn contains(&self, hour: f64) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Approximate local solar hour: UTC time of day shifted by longitude / 15.
///
/// Ignores the equation of time (up to about a quarter hour).
pub fn solar_local_hour(acquired: DateTime<Utc>, lon: f64) -> f64 {
    let utc_hour = acquired.hour() as f64
        + acquired.minute() as f64 / 60.0
        + acquired.second() as f64 / 3600.0;
    (utc_hour + lon / 15.0).rem_euclid(24.0)
}

/// Fraction of the region covered by the footprint, in [0, 1].
///
/// A degenerate (zero-area) region counts as fully covered by any footprint
/// containing its centroid.
pub fn coverage_ratio(footprint: &BoundingBox, query: &RegionQuery) -> f64 {
    let region = &query.region;
    let area = region.area();
    if area <= 0.0 {
        return if footprint.contains_point(query.centroid_lon, query.centroid_lat) {
            1.0
        } else {
            0.0
        };
    }
    match footprint.intersection(region) {
        Some(overlap) => (overlap.area() / area).clamp(0.0, 1.0),
        None => 0.0,
    }
}

pub fn cloud_ratio(cloud_cover_percent: Option<f64>) -> f64 {
    cloud_cover_percent
        .filter(|v| v.is_finite())
        .map(|v| (v / 100.0).clamp(0.0, 1.0))
        .unwrap_or(UNKNOWN_CLOUD_RATIO)
}

pub fn recency_score(acquired: DateTime<Utc>, window: &TimeWindow) -> f64 {
    window.fraction_of(acquired)
}

pub fn estimated_valid_ratio(coverage: f64, cloud: f64) -> f64 {
    coverage * (1.0 - cloud * CLOUD_LOSS_FACTOR)
}

/// Convex combination of coverage, estimated valid ratio, clear sky and recency.
pub fn quality_score(coverage: f64, cloud: f64, recency: f64) -> f64 {
    let score = COVERAGE_WEIGHT * coverage
        + VALID_WEIGHT * estimated_valid_ratio(coverage, cloud)
        + CLEAR_SKY_WEIGHT * (1.0 - cloud)
        + RECENCY_WEIGHT * recency;
    score.clamp(0.0, 1.0)
}

/// Scores granules against one query and its overall search window.
#[derive(Debug, Clone)]
pub struct QualityScorer<'a> {
    query: &'a RegionQuery,
    window: TimeWindow,
}

impl<'a> QualityScorer<'a> {
    pub fn new(query: &'a RegionQuery, window: TimeWindow) -> Self {
        Self { query, window }
    }

    pub fn score(&self, granule: Granule) -> ScoredGranule {
        let coverage = coverage_ratio(&granule.footprint, self.query);
        let cloud = cloud_ratio(granule.cloud_cover_percent);
        let recency = recency_score(granule.acquired, &self.window);
        let hour = solar_local_hour(granule.acquired, self.query.centroid_lon);

        ScoredGranule {
            quality_score: quality_score(coverage, cloud, recency),
            coverage_ratio: coverage,
            cloud_ratio: cloud,
            recency_score: recency,
            solar_local_hour: hour,
            granule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo_common::GranuleFilters;

    fn query(region: BoundingBox) -> RegionQuery {
        let (lon, lat) = region.center();
        RegionQuery::new(lat, lon, Some(region), None, GranuleFilters::default(), 0.05).unwrap()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let sum = COVERAGE_WEIGHT + VALID_WEIGHT + CLEAR_SKY_WEIGHT + RECENCY_WEIGHT;
        assert!((sum - 1.0).abs() < 1e-12);
        assert!((quality_score(1.0, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(quality_score(0.0, 1.0, 0.0), 0.0);
    }

    #[test]
    fn test_coverage_inside_and_disjoint() {
        let q = query(BoundingBox::new(10.0, 47.0, 10.2, 47.2));
        assert_eq!(coverage_ratio(&BoundingBox::new(9.0, 46.0, 11.0, 48.0), &q), 1.0);
        assert_eq!(coverage_ratio(&BoundingBox::new(20.0, 46.0, 21.0, 48.0), &q), 0.0);
        let half = coverage_ratio(&BoundingBox::new(10.1, 46.0, 11.0, 48.0), &q);
        assert!((half - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_cloud_defaults_to_half() {
        assert_eq!(cloud_ratio(None), 0.5);
        assert_eq!(cloud_ratio(Some(25.0)), 0.25);
        assert_eq!(cloud_ratio(Some(f64::NAN)), 0.5);
    }

    #[test]
    fn test_solar_local_hour() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        assert!((solar_local_hour(t, 0.0) - 10.5).abs() < 1e-9);
        assert!((solar_local_hour(t, 15.0) - 11.5).abs() < 1e-9);
        assert!((solar_local_hour(t, -180.0) - 22.5).abs() < 1e-9);
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap();
        assert!((solar_local_hour(late, 30.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_daytime_band() {
        let band = DaytimeBand::default();
        assert!(band.contains(10.0));
        assert!(band.contains(15.99));
        assert!(!band.contains(16.0));
        assert!(!band.contains(2.0));

        let night = DaytimeBand {
            start_hour: 22.0,
            end_hour: 4.0,
        };
        assert!(night.contains(23.0));
        assert!(night.contains(1.0));
        assert!(!night.contains(12.0));
    }
}
