//! Footprint resolution for catalog records.

use geo_common::BoundingBox;
use serde::Serialize;

use crate::CatalogRecord;

/// Latitude bands C..X, 8 degrees each starting at 80S (X is 12 degrees).
const MGRS_BANDS: &[u8] = b"CDEFGHJKLMNPQRSTUVWX";
/// 100 km row letters; even zones start at F.
const MGRS_ROWS: &[u8] = b"ABCDEFGHJKLMNPQRSTUV";
const MGRS_COLUMN_SETS: [&[u8]; 3] = [b"STUVWXYZ", b"ABCDEFGH", b"JKLMNPQR"];

const KM_PER_DEG_LAT: f64 = 110.574;
const KM_PER_DEG_LON_EQUATOR: f64 = 111.32;
const FALSE_EASTING_KM: f64 = 500.0;
const FALSE_NORTHING_SOUTH_KM: f64 = 10_000.0;
const SQUARE_KM: f64 = 100.0;

/// Where a record's footprint came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Footprint {
    /// Catalog-supplied bounding box(es).
    Explicit { bbox: BoundingBox },
    /// Min/max reduction over polygon ring vertices.
    Polygon { bbox: BoundingBox },
    /// Decoded from a grid-tile identifier in the granule name. Coarse.
    GridTile { bbox: BoundingBox, tile: String },
    Unresolvable,
}

impl Footprint {
    /// Explicit boxes, then polygon rings, then an embedded grid-tile id.
    pub fn resolve(record: &CatalogRecord) -> Self {
        if let Some(bbox) = union_all(record.boxes.iter().filter_map(|b| parse_box(b))) {
            return Footprint::Explicit { bbox };
        }

        let rings = record.polygons.iter().flatten();
        if let Some(bbox) = union_all(rings.filter_map(|r| parse_ring(r))) {
            return Footprint::Polygon { bbox };
        }

        for name in [&record.title, &record.id] {
            if let Some((tile, bbox)) = find_grid_tile(name) {
                return Footprint::GridTile { bbox, tile };
            }
        }

        Footprint::Unresolvable
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            Footprint::Explicit { bbox }
            | Footprint::Polygon { bbox }
            | Footprint::GridTile { bbox, .. } => Some(*bbox),
            Footprint::Unresolvable => None,
        }
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, Footprint::GridTile { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Footprint::Explicit { .. } => "explicit",
            Footprint::Polygon { .. } => "polygon",
            Footprint::GridTile { .. } => "grid_tile",
            Footprint::Unresolvable => "unresolvable",
        }
    }
}

fn union_all(boxes: impl Iterator<Item = BoundingBox>) -> Option<BoundingBox> {
    boxes.reduce(|a, b| a.union(&b))
}

fn parse_numbers(s: &str) -> Option<Vec<f64>> {
    s.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect()
}

/// "south west north east"
fn parse_box(s: &str) -> Option<BoundingBox> {
    let v = parse_numbers(s)?;
    if v.len() != 4 {
        return None;
    }
    let bbox = BoundingBox::from_swne(v[0], v[1], v[2], v[3]);
    (bbox.is_valid() && in_range(&bbox)).then_some(bbox)
}

/// "lat lon lat lon ..."
fn parse_ring(s: &str) -> Option<BoundingBox> {
    let v = parse_numbers(s)?;
    if v.len() < 6 || v.len() % 2 != 0 {
        return None;
    }
    let bbox = BoundingBox::from_points(v.chunks_exact(2).map(|p| (p[1], p[0])))?;
    in_range(&bbox).then_some(bbox)
}

fn in_range(b: &BoundingBox) -> bool {
    b.min_x >= -180.0 && b.max_x <= 180.0 && b.min_y >= -90.0 && b.max_y <= 90.0
}

/// Scan a granule name for an MGRS 100 km square such as `T32UNE` or `32UNE`.
fn find_grid_tile(name: &str) -> Option<(String, BoundingBox)> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|token| {
            let code = token.strip_prefix('T').unwrap_or(token);
            decode_mgrs_square(code).map(|bbox| (code.to_string(), bbox))
        })
        .next()
}

/// Approximate lon/lat box for an MGRS 100 km square.
///
/// Uses a flat-earth conversion around the zone's central meridian, good to
/// roughly half a degree at mid latitudes.
pub fn decode_mgrs_square(code: &str) -> Option<BoundingBox> {
    let bytes = code.as_bytes();
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if !(1..=2).contains(&digits) || bytes.len() != digits + 3 {
        return None;
    }

    let zone: u32 = code[..digits].parse().ok()?;
    if !(1..=60).contains(&zone) {
        return None;
    }
    let band = MGRS_BANDS.iter().position(|&b| b == bytes[digits])?;
    let column = MGRS_COLUMN_SETS[(zone % 3) as usize]
        .iter()
        .position(|&b| b == bytes[digits + 1])?;
    let row_letter = MGRS_ROWS.iter().position(|&b| b == bytes[digits + 2])?;

    let band_south = -80.0 + 8.0 * band as f64;
    let band_north = if band == MGRS_BANDS.len() - 1 { 84.0 } else { band_south + 8.0 };
    let southern = band_south < 0.0;

    let offset = if zone % 2 == 0 { 5 } else { 0 };
    let row = (row_letter + MGRS_ROWS.len() - offset) % MGRS_ROWS.len();
    let base_km = row as f64 * SQUARE_KM;

    // Row letters repeat every 2000 km; keep the cycle nearest the band.
    let lat_of = |northing_km: f64| {
        let n = if southern { northing_km - FALSE_NORTHING_SOUTH_KM } else { northing_km };
        n / KM_PER_DEG_LAT
    };
    let band_distance = |lat: f64| {
        if lat < band_south {
            band_south - lat
        } else if lat > band_north {
            lat - band_north
        } else {
            0.0
        }
    };
    let northing = (0..5)
        .map(|cycle| base_km + cycle as f64 * 2000.0)
        .min_by(|a, b| {
            let da = band_distance(lat_of(a + SQUARE_KM / 2.0));
            let db = band_distance(lat_of(b + SQUARE_KM / 2.0));
            da.total_cmp(&db)
        })?;

    let lat_a = lat_of(northing);
    let lat_b = lat_of(northing + SQUARE_KM);
    let (lat_min, lat_max) = (lat_a.min(lat_b).max(-80.0), lat_a.max(lat_b).min(84.0));

    let central_meridian = -183.0 + 6.0 * zone as f64;
    let easting_min = (column as f64 + 1.0) * SQUARE_KM - FALSE_EASTING_KM;
    let easting_max = easting_min + SQUARE_KM;

    let lons = [lat_min, lat_max].into_iter().flat_map(|lat| {
        let km_per_deg = KM_PER_DEG_LON_EQUATOR * lat.to_radians().cos().max(0.05);
        [
            central_meridian + easting_min / km_per_deg,
            central_meridian + easting_max / km_per_deg,
        ]
    });
    let (lon_min, lon_max) = lons.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });

    let bbox = BoundingBox::new(
        lon_min.max(-180.0),
        lat_min,
        lon_max.min(180.0),
        lat_max,
    );
    bbox.is_valid().then_some(bbox)
}
