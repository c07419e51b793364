//! Wire schema for CMR-style granule search responses.
//!
//! The catalog's JSON is loosely typed: fields go missing, `null` shows up
//! where arrays are expected and cloud cover arrives as either a number or a
//! string. Everything here is deliberately permissive; [`CmrEntry::validate`]
//! turns an entry into a [`CatalogRecord`] the rest of the crate can trust.

use chrono::{DateTime, Utc};
use geo_common::time::parse_iso8601;
use serde::Deserialize;

use crate::CatalogError;

#[derive(Debug, Default, Deserialize)]
pub struct CmrResponse {
    #[serde(default)]
    pub feed: CmrFeed,
}

#[derive(Debug, Default, Deserialize)]
pub struct CmrFeed {
    #[serde(default)]
    pub entry: Option<Vec<CmrEntry>>,
}

impl CmrResponse {
    pub fn into_entries(self) -> Vec<CmrEntry> {
        self.feed.entry.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CmrEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub producer_granule_id: Option<String>,
    #[serde(default)]
    pub time_start: Option<String>,
    #[serde(default)]
    pub cloud_cover: Option<CloudCover>,
    #[serde(default)]
    pub boxes: Option<Vec<String>>,
    #[serde(default)]
    pub polygons: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub links: Option<Vec<CmrLink>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CloudCover {
    Number(f64),
    Text(String),
}

impl CloudCover {
    /// Percent in [0, 100], or `None` if unparseable.
    pub fn percent(&self) -> Option<f64> {
        let v = match self {
            CloudCover::Number(v) => *v,
            CloudCover::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then(|| v.clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CmrLink {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub rel: Option<String>,
    #[serde(default)]
    pub inherited: bool,
}

/// A validated catalog record. Geometry is kept raw; footprint resolution
/// decides which of it to trust.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    pub id: String,
    pub title: String,
    pub acquired: DateTime<Utc>,
    pub cloud_cover_percent: Option<f64>,
    /// "south west north east" strings
    pub boxes: Vec<String>,
    /// Rings of "lat lon lat lon ..." strings
    pub polygons: Vec<Vec<String>>,
    pub data_links: Vec<String>,
}

impl CmrEntry {
    /// Validate into a [`CatalogRecord`]. An entry needs an identifier and a
    /// parseable start time; everything else is optional.
    pub fn validate(self, asset_suffix: Option<&str>) -> Result<CatalogRecord, CatalogError> {
        let id = self
            .id
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.producer_granule_id.clone())
            .ok_or_else(|| CatalogError::MalformedRecord("entry without id".to_string()))?;

        let time_start = self
            .time_start
            .ok_or_else(|| CatalogError::MalformedRecord(format!("{}: missing time_start", id)))?;
        let acquired = parse_iso8601(&time_start)
            .map_err(|e| CatalogError::MalformedRecord(format!("{}: {}", id, e)))?;

        let title = self
            .title
            .or(self.producer_granule_id)
            .unwrap_or_else(|| id.clone());

        let data_links = select_data_links(self.links.as_deref().unwrap_or_default(), asset_suffix);

        Ok(CatalogRecord {
            id,
            title,
            acquired,
            cloud_cover_percent: self.cloud_cover.as_ref().and_then(CloudCover::percent),
            boxes: self.boxes.unwrap_or_default(),
            polygons: self.polygons.unwrap_or_default(),
            data_links,
        })
    }
}

/// Raster links: http(s) GeoTIFFs, with links matching `asset_suffix` first.
/// Collection-level (inherited) links are ignored.
pub fn select_data_links(links: &[CmrLink], asset_suffix: Option<&str>) -> Vec<String> {
    let mut rasters: Vec<&str> = links
        .iter()
        .filter(|l| !l.inherited)
        .filter(|l| !matches!(l.rel.as_deref(), Some(rel) if rel.ends_with("/browse#")))
        .filter_map(|l| l.href.as_deref())
        .filter(|href| href.starts_with("https://") || href.starts_with("http://"))
        .filter(|href| {
            let path = strip_query(href).to_ascii_lowercase();
            path.ends_with(".tif") || path.ends_with(".tiff")
        })
        .collect();

    if let Some(suffix) = asset_suffix.filter(|s| !s.is_empty()) {
        let suffix = suffix.to_ascii_lowercase();
        // stable: keeps catalog order inside each group
        rasters.sort_by_key(|href| !strip_query(href).to_ascii_lowercase().ends_with(&suffix));
    }

    let mut out: Vec<String> = Vec::with_capacity(rasters.len());
    for href in rasters {
        if !out.iter().any(|h| h == href) {
            out.push(href.to_string());
        }
    }
    out
}

fn strip_query(href: &str) -> &str {
    href.split(['?', '#']).next().unwrap_or(href)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link(href: &str) -> CmrLink {
        CmrLink {
            href: Some(href.to_string()),
            rel: Some("http://esipfed.org/ns/fedsearch/1.1/data#".to_string()),
            inherited: false,
        }
    }

    #[test]
    fn test_cloud_cover_number_or_string() {
        assert_eq!(CloudCover::Number(12.5).percent(), Some(12.5));
        assert_eq!(CloudCover::Text(" 40 ".into()).percent(), Some(40.0));
        assert_eq!(CloudCover::Text("n/a".into()).percent(), None);
        assert_eq!(CloudCover::Number(140.0).percent(), Some(100.0));
    }

    #[test]
    fn test_null_fields_are_tolerated() {
        let entry: CmrEntry = serde_json::from_value(json!({
            "id": "G1",
            "time_start": "2024-06-01T10:30:00.000Z",
            "boxes": null,
            "polygons": null,
            "links": null,
            "cloud_cover": "7"
        }))
        .unwrap();
        let record = entry.validate(None).unwrap();
        assert_eq!(record.id, "G1");
        assert_eq!(record.title, "G1");
        assert_eq!(record.cloud_cover_percent, Some(7.0));
        assert!(record.boxes.is_empty());
        assert!(record.data_links.is_empty());
    }

    #[test]
    fn test_missing_time_is_malformed() {
        let entry: CmrEntry = serde_json::from_value(json!({ "id": "G2" })).unwrap();
        assert!(matches!(entry.validate(None), Err(CatalogError::MalformedRecord(_))));

        let entry: CmrEntry =
            serde_json::from_value(json!({ "id": "G3", "time_start": "last tuesday" })).unwrap();
        assert!(entry.validate(None).is_err());
    }

    #[test]
    fn test_data_link_selection() {
        let links = vec![
            link("https://data.example.org/G1/B04.tif"),
            link("https://data.example.org/G1/G1_LST.tif"),
            link("s3://bucket/G1/G1_LST.tif"),
            link("https://data.example.org/G1/G1.xml"),
            CmrLink {
                href: Some("https://data.example.org/collection.tif".into()),
                rel: None,
                inherited: true,
            },
            link("https://data.example.org/G1/B04.tif"),
        ];

        assert_eq!(
            select_data_links(&links, None),
            vec![
                "https://data.example.org/G1/B04.tif",
                "https://data.example.org/G1/G1_LST.tif"
            ]
        );
        assert_eq!(
            select_data_links(&links, Some("_lst.tif"))[0],
            "https://data.example.org/G1/G1_LST.tif"
        );
    }
}
