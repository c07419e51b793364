//! Granule and region query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BoundingBox, GeoError, GeoResult, TimeWindow};

/// One discrete satellite capture with a resolved footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Granule {
    pub id: String,
    pub title: String,
    pub acquired: DateTime<Utc>,
    pub cloud_cover_percent: Option<f64>,
    /// `[minLon, minLat, maxLon, maxLat]` footprint
    pub footprint: BoundingBox,
    /// True when the footprint was derived from the identifier rather than geometry.
    pub footprint_approximate: bool,
    pub data_links: Vec<String>,
}

/// A granule plus the scores computed against one region query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredGranule {
    pub granule: Granule,
    pub coverage_ratio: f64,
    pub cloud_ratio: f64,
    pub recency_score: f64,
    pub solar_local_hour: f64,
    pub quality_score: f64,
}

impl ScoredGranule {
    pub fn coverage_percent(&self) -> f64 {
        self.coverage_ratio * 100.0
    }

    pub fn cloud_percent(&self) -> f64 {
        self.cloud_ratio * 100.0
    }
}

/// Selection filters attached to a region query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GranuleFilters {
    pub daytime_only: bool,
    /// Minimum quality score in [0, 1]
    pub min_quality: f64,
    /// Maximum cloud cover in percent
    pub max_cloud_percent: f64,
    pub max_granules: usize,
}

impl Default for GranuleFilters {
    fn default() -> Self {
        Self {
            daytime_only: true,
            min_quality: 0.0,
            max_cloud_percent: 100.0,
            max_granules: 10,
        }
    }
}

/// A discovery request for one target cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionQuery {
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub region: BoundingBox,
    /// Explicit time window; `None` means "recent warm seasons".
    pub window: Option<TimeWindow>,
    /// The window's end was not given and runs until the request time.
    #[serde(default)]
    pub window_open_ended: bool,
    pub filters: GranuleFilters,
}

impl RegionQuery {
    /// Validate coordinates and build a query. Without an explicit region the
    /// cell is a `half_extent_deg` box around the centroid.
    pub fn new(
        lat: f64,
        lon: f64,
        region: Option<BoundingBox>,
        window: Option<TimeWindow>,
        filters: GranuleFilters,
        half_extent_deg: f64,
    ) -> GeoResult<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeoError::invalid("lat", "must be within [-90, 90]"));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::invalid("lon", "must be within [-180, 180]"));
        }
        if !(0.0..=1.0).contains(&filters.min_quality) {
            return Err(GeoError::invalid("min_quality", "must be within [0, 1]"));
        }
        if filters.max_granules == 0 {
            return Err(GeoError::invalid("max_granules", "must be at least 1"));
        }

        let region = match region {
            Some(bbox) if bbox.is_valid() => bbox,
            Some(bbox) => return Err(GeoError::InvalidBbox(bbox.cache_key())),
            None => BoundingBox::new(
                lon - half_extent_deg,
                lat - half_extent_deg,
                lon + half_extent_deg,
                lat + half_extent_deg,
            ),
        };

        Ok(Self {
            centroid_lat: lat,
            centroid_lon: lon,
            region,
            window,
            window_open_ended: false,
            filters,
        })
    }

    /// Mark the window as running until "now" rather than to a fixed end.
    pub fn with_open_ended_window(mut self) -> Self {
        self.window_open_ended = self.window.is_some();
        self
    }

    /// A granule footprint is eligible if it intersects the region or contains the centroid.
    pub fn is_eligible(&self, footprint: &BoundingBox) -> bool {
        footprint.intersects(&self.region)
            || footprint.contains_point(self.centroid_lon, self.centroid_lat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_region_around_centroid() {
        let q = RegionQuery::new(48.0, 11.0, None, None, GranuleFilters::default(), 0.05).unwrap();
        assert!((q.region.width() - 0.1).abs() < 1e-12);
        assert!(q.region.contains_point(11.0, 48.0));
    }

    #[test]
    fn test_rejects_bad_coordinates() {
        let f = GranuleFilters::default();
        assert!(RegionQuery::new(91.0, 0.0, None, None, f, 0.05).is_err());
        assert!(RegionQuery::new(0.0, -181.0, None, None, f, 0.05).is_err());
        assert!(RegionQuery::new(f64::NAN, 0.0, None, None, f, 0.05).is_err());
    }

    #[test]
    fn test_eligibility_by_centroid_containment() {
        let q = RegionQuery::new(10.0, 10.0, None, None, GranuleFilters::default(), 0.0).unwrap();
        // Degenerate region: only containment of the centroid can make a footprint eligible.
        assert!(q.is_eligible(&BoundingBox::new(9.0, 9.0, 11.0, 11.0)));
        assert!(!q.is_eligible(&BoundingBox::new(20.0, 20.0, 21.0, 21.0)));
    }
}
