//! GeoTIFF georeferencing: affine pixel transform and CRS identification.

use geo_common::tile::{bbox_to_mercator, lonlat_to_mercator, mercator_y_to_lat, MERCATOR_MAX_EXTENT};
use geo_common::BoundingBox;

use crate::tiff::ImageDirectory;
use crate::{CogError, CogResult};

const GT_MODEL_TYPE: u64 = 1024;
const GT_RASTER_TYPE: u64 = 1025;
const GEOGRAPHIC_TYPE: u64 = 2048;
const PROJECTED_CS_TYPE: u64 = 3072;

const RASTER_PIXEL_IS_POINT: u64 = 2;
const USER_DEFINED: u64 = 32767;

/// The coordinate systems rasters may be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// EPSG:4326, degrees
    Wgs84,
    /// EPSG:3857, meters
    WebMercator,
}

impl Crs {
    pub fn from_epsg(code: u64) -> CogResult<Self> {
        match code {
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 | 3785 => Ok(Crs::WebMercator),
            other => Err(CogError::UnsupportedCrs(format!("EPSG:{}", other))),
        }
    }

    pub fn epsg(self) -> u32 {
        match self {
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }

    /// Lon/lat to native coordinates.
    pub fn from_lonlat(self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (lon, lat),
            Crs::WebMercator => lonlat_to_mercator(lon, lat),
        }
    }

    /// Lon/lat bbox to native coordinates. Latitudes beyond the Mercator
    /// domain are clamped.
    pub fn bbox_from_lonlat(self, bbox: &BoundingBox) -> BoundingBox {
        match self {
            Crs::Wgs84 => *bbox,
            Crs::WebMercator => bbox_to_mercator(bbox),
        }
    }

    /// Native bbox back to lon/lat.
    pub fn bbox_to_lonlat(self, bbox: &BoundingBox) -> BoundingBox {
        match self {
            Crs::Wgs84 => *bbox,
            Crs::WebMercator => {
                let lon = |x: f64| x / MERCATOR_MAX_EXTENT * 180.0;
                BoundingBox::new(
                    lon(bbox.min_x),
                    mercator_y_to_lat(bbox.min_y),
                    lon(bbox.max_x),
                    mercator_y_to_lat(bbox.max_y),
                )
            }
        }
    }
}

/// North-up affine transform from pixel corners to CRS coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X of the upper-left corner of pixel (0, 0)
    pub origin_x: f64,
    /// Y of the upper-left corner of pixel (0, 0)
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Positive; rows grow southward
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_directory(dir: &ImageDirectory) -> CogResult<Self> {
        let point_offset = if geo_key(dir, GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
            0.5
        } else {
            0.0
        };

        let transform = if let (Some(scale), Some(tie)) = (&dir.pixel_scale, &dir.tiepoint) {
            if scale.len() < 2 || tie.len() < 6 {
                return Err(CogError::InvalidStructure("short pixel scale or tiepoint".into()));
            }
            let (sx, sy) = (scale[0], scale[1]);
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            GeoTransform {
                origin_x: x - i * sx,
                origin_y: y + j * sy,
                pixel_width: sx,
                pixel_height: sy,
            }
        } else if let Some(m) = &dir.transformation {
            if m.len() < 8 {
                return Err(CogError::InvalidStructure("short model transformation".into()));
            }
            if m[1] != 0.0 || m[4] != 0.0 {
                return Err(CogError::unsupported("rotated model transformation", format!("{:?}", &m[..8])));
            }
            GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            }
        } else {
            return Err(CogError::MissingGeoreference);
        };

        if !(transform.pixel_width > 0.0 && transform.pixel_height > 0.0) {
            return Err(CogError::InvalidStructure(format!(
                "pixel size {}x{}",
                transform.pixel_width, transform.pixel_height
            )));
        }

        Ok(GeoTransform {
            origin_x: transform.origin_x - point_offset * transform.pixel_width,
            origin_y: transform.origin_y + point_offset * transform.pixel_height,
            ..transform
        })
    }

    /// Fractional pixel coordinates of a CRS point.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    pub fn to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    pub fn bounds(&self, width: u32, height: u32) -> BoundingBox {
        let (max_x, min_y) = self.to_world(width as f64, height as f64);
        BoundingBox::new(self.origin_x, min_y, max_x, self.origin_y)
    }
}

fn geo_key(dir: &ImageDirectory, key: u64) -> Option<u64> {
    let keys = dir.geo_keys.as_ref()?;
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

/// Identify the raster CRS from its GeoKeys.
///
/// Rasters without GeoKeys whose extent is a plausible lon/lat box are
/// taken as EPSG:4326.
pub fn detect_crs(dir: &ImageDirectory, transform: &GeoTransform) -> CogResult<Crs> {
    let projected = geo_key(dir, PROJECTED_CS_TYPE);
    let geographic = geo_key(dir, GEOGRAPHIC_TYPE);

    match (projected, geographic) {
        (Some(code), _) if code != USER_DEFINED => Crs::from_epsg(code),
        (None, Some(code)) if code != USER_DEFINED => Crs::from_epsg(code),
        (Some(_), _) | (None, Some(_)) => Err(CogError::UnsupportedCrs("user-defined".into())),
        (None, None) => {
            let model = geo_key(dir, GT_MODEL_TYPE);
            let bounds = transform.bounds(dir.width, dir.height);
            let plausible = bounds.min_x >= -180.0
                && bounds.max_x <= 180.0
                && bounds.min_y >= -90.0
                && bounds.max_y <= 90.0;
            if model != Some(1) && plausible {
                Ok(Crs::Wgs84)
            } else {
                Err(CogError::UnsupportedCrs("no CRS GeoKeys".into()))
            }
        }
    }
}
