//! Shared fixtures: reference regions and ready-made rasters.

use crate::geotiff::{GeoTiffBuilder, TiffCompression};
use crate::generators::{create_lst_grid, punch_nodata};

/// Reference locations as `(lat, lon)`.
pub mod points {
    pub const MUNICH: (f64, f64) = (48.137, 11.575);
    pub const HAMBURG: (f64, f64) = (53.551, 9.994);
    pub const SYDNEY: (f64, f64) = (-33.869, 151.209);
}

/// Reference boxes as `(min_lon, min_lat, max_lon, max_lat)`.
pub mod bbox {
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, -90.0, 180.0, 90.0);

    /// Southern Bavaria, covered by [`super::bavaria_lst`].
    pub const BAVARIA: (f64, f64, f64, f64) = (10.0, 47.0, 12.56, 49.56);

    pub const INVALID: (f64, f64, f64, f64) = (10.0, 10.0, 5.0, 5.0);
}

/// Nodata marker used by the fixture rasters.
pub const FIXTURE_NODATA: f64 = -999.0;

/// 64x64 EPSG:4326 surface-temperature raster over [`bbox::BAVARIA`]:
/// 280 K at the west edge to 320 K at the east edge, every 7th pixel nodata,
/// deflate-compressed in 32x32 tiles.
pub fn bavaria_lst() -> GeoTiffBuilder {
    let values = punch_nodata(create_lst_grid(64, 64, 280.0, 320.0), 7, FIXTURE_NODATA);
    GeoTiffBuilder::new(64, 64, values)
        .geographic(bbox::BAVARIA.0, bbox::BAVARIA.3, 0.04)
        .compression(TiffCompression::Deflate)
        .tiled(32, 32)
        .nodata(FIXTURE_NODATA)
}

/// Same footprint as [`bavaria_lst`] with every pixel set to nodata.
pub fn bavaria_all_nodata() -> GeoTiffBuilder {
    GeoTiffBuilder::new(64, 64, vec![FIXTURE_NODATA; 64 * 64])
        .geographic(bbox::BAVARIA.0, bbox::BAVARIA.3, 0.04)
        .compression(TiffCompression::Deflate)
        .tiled(32, 32)
        .nodata(FIXTURE_NODATA)
}
