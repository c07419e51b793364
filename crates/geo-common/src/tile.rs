//! XYZ (Web Mercator) tile coordinates and tile/coordinate math.

use crate::{BoundingBox, GeoError, GeoResult};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Deepest zoom level accepted from clients.
pub const MAX_ZOOM: u32 = 24;

/// Half the Web Mercator world width in meters.
pub const MERCATOR_MAX_EXTENT: f64 = 20037508.342789244;

/// Latitude limit of the Web Mercator square.
pub const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y), top-left origin
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Validate client-supplied coordinates.
    pub fn checked(z: u32, x: u32, y: u32) -> GeoResult<Self> {
        if z > MAX_ZOOM {
            return Err(GeoError::InvalidTile {
                z,
                x,
                y,
                message: format!("zoom must be <= {}", MAX_ZOOM),
            });
        }
        let n = Self::tiles_at_zoom(z);
        if x >= n || y >= n {
            return Err(GeoError::InvalidTile {
                z,
                x,
                y,
                message: format!("x and y must be < {}", n),
            });
        }
        Ok(Self { z, x, y })
    }

    /// Number of tiles per axis at a zoom level.
    pub fn tiles_at_zoom(z: u32) -> u32 {
        1u32 << z
    }

    /// Generate a cache key string.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }

    /// Geographic bounds of this tile.
    pub fn bounds(&self) -> BoundingBox {
        tile_to_latlon_bounds(self)
    }
}

/// Convert lat/lon to Web Mercator tile coordinates.
///
/// Points on the east or south edge of the world are clamped into the last tile.
pub fn latlon_to_tile(lat: f64, lon: f64, zoom: u32) -> TileCoord {
    let n = TileCoord::tiles_at_zoom(zoom) as f64;
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);

    let x = ((lon + 180.0) / 360.0 * n).floor().clamp(0.0, n - 1.0) as u32;
    let y = (lat_to_tile_fraction(lat) * n).floor().clamp(0.0, n - 1.0) as u32;

    TileCoord { z: zoom, x, y }
}

/// Convert Web Mercator tile coordinates to lat/lon bounds.
///
/// Edges are computed from the integer tile index alone, so tiles (x, y) and
/// (x + 1, y) share the same edge value bit for bit.
pub fn tile_to_latlon_bounds(coord: &TileCoord) -> BoundingBox {
    let n = TileCoord::tiles_at_zoom(coord.z) as f64;

    let lon_min = tile_x_to_lon(coord.x as f64, n);
    let lon_max = tile_x_to_lon((coord.x + 1) as f64, n);
    let lat_max = tile_y_to_lat(coord.y as f64, n);
    let lat_min = tile_y_to_lat((coord.y + 1) as f64, n);

    BoundingBox::new(lon_min, lat_min, lon_max, lat_max)
}

fn tile_x_to_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Fractional tile row (0 at the top of the world, 1 at the bottom).
fn lat_to_tile_fraction(lat: f64) -> f64 {
    let lat_rad = lat.to_radians();
    (1.0 - lat_rad.tan().asinh() / PI) / 2.0
}

/// Latitude in degrees to Web Mercator y in meters.
pub fn lat_to_mercator_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    lat.to_radians().tan().asinh() * MERCATOR_MAX_EXTENT / PI
}

/// Web Mercator y in meters to latitude in degrees.
pub fn mercator_y_to_lat(y: f64) -> f64 {
    (y / MERCATOR_MAX_EXTENT * PI).sinh().atan().to_degrees()
}

/// Longitude/latitude in degrees to Web Mercator meters.
pub fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    (lon * MERCATOR_MAX_EXTENT / 180.0, lat_to_mercator_y(lat))
}

/// Geographic bbox to Web Mercator bbox (meters).
pub fn bbox_to_mercator(bbox: &BoundingBox) -> BoundingBox {
    let (min_x, min_y) = lonlat_to_mercator(bbox.min_x, bbox.min_y);
    let (max_x, max_y) = lonlat_to_mercator(bbox.max_x, bbox.max_y);
    BoundingBox::new(min_x, min_y, max_x, max_y)
}
