//! Builders for CMR-style catalog JSON.

use serde_json::{json, Map, Value};

/// Wrap entries in a `{"feed": {"entry": [...]}}` search response.
pub fn cmr_feed(entries: Vec<Value>) -> Value {
    json!({ "feed": { "entry": entries } })
}

/// One granule entry as the catalog would return it.
///
/// ```
/// use test_utils::catalog::CmrEntryBuilder;
///
/// let entry = CmrEntryBuilder::new("G1")
///     .time_start("2024-06-10T10:30:00Z")
///     .bbox(46.0, 10.0, 48.0, 12.0)
///     .build();
/// assert_eq!(entry["boxes"][0], "46 10 48 12");
/// ```
#[derive(Debug, Clone)]
pub struct CmrEntryBuilder {
    fields: Map<String, Value>,
    boxes: Vec<String>,
    polygons: Vec<Vec<String>>,
    links: Vec<Value>,
}

impl CmrEntryBuilder {
    pub fn new(id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), json!(id));
        fields.insert("title".into(), json!(id));
        Self {
            fields,
            boxes: Vec::new(),
            polygons: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.fields.insert("title".into(), json!(title));
        self
    }

    pub fn time_start(mut self, time: &str) -> Self {
        self.fields.insert("time_start".into(), json!(time));
        self
    }

    pub fn cloud_cover(mut self, percent: f64) -> Self {
        self.fields.insert("cloud_cover".into(), json!(percent));
        self
    }

    /// Some collections report cloud cover as a string.
    pub fn cloud_cover_text(mut self, percent: &str) -> Self {
        self.fields.insert("cloud_cover".into(), json!(percent));
        self
    }

    /// Catalog box order: south, west, north, east.
    pub fn bbox(mut self, south: f64, west: f64, north: f64, east: f64) -> Self {
        self.boxes.push(format!("{} {} {} {}", south, west, north, east));
        self
    }

    /// One ring of `(lat, lon)` vertices.
    pub fn polygon(mut self, ring: &[(f64, f64)]) -> Self {
        let coords: Vec<String> = ring
            .iter()
            .map(|(lat, lon)| format!("{} {}", lat, lon))
            .collect();
        self.polygons.push(vec![coords.join(" ")]);
        self
    }

    pub fn link(mut self, href: &str) -> Self {
        self.links.push(json!({
            "href": href,
            "rel": "http://esipfed.org/ns/fedsearch/1.1/data#",
        }));
        self
    }

    pub fn build(mut self) -> Value {
        if !self.boxes.is_empty() {
            self.fields.insert("boxes".into(), json!(self.boxes));
        }
        if !self.polygons.is_empty() {
            self.fields.insert("polygons".into(), json!(self.polygons));
        }
        self.fields.insert("links".into(), Value::Array(self.links));
        Value::Object(self.fields)
    }
}
