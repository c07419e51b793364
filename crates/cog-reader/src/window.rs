//! Source pixel windows and output sampling grids.

use geo_common::tile::{lat_to_mercator_y, mercator_y_to_lat};
use geo_common::BoundingBox;
use serde::Serialize;

use crate::geo::GeoTransform;

const EDGE_EPSILON: f64 = 1e-6;

/// The part of the source raster a read touches, in source pixel space.
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelWindow {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl PixelWindow {
    /// Window covering `native` (request bbox in the raster CRS), clipped to
    /// the raster. `None` when nothing of positive size remains.
    pub fn clipped(
        transform: &GeoTransform,
        raster_width: u32,
        raster_height: u32,
        native: &BoundingBox,
        target_width: u32,
        target_height: u32,
    ) -> Option<Self> {
        let raster = transform.bounds(raster_width, raster_height);
        let overlap = raster.intersection(native)?;

        let (left, top) = transform.to_pixel(overlap.min_x, overlap.max_y);
        let (right, bottom) = transform.to_pixel(overlap.max_x, overlap.min_y);
        let clamp_x = |v: f64| v.clamp(0.0, raster_width as f64) as u32;
        let clamp_y = |v: f64| v.clamp(0.0, raster_height as f64) as u32;

        // absorb rounding noise from the division so exact edges don't grow a pixel
        let floor = |v: f64| (v + EDGE_EPSILON).floor();
        let ceil = |v: f64| (v - EDGE_EPSILON).ceil();

        let window = PixelWindow {
            left: clamp_x(floor(left)),
            top: clamp_y(floor(top)),
            right: clamp_x(ceil(right)),
            bottom: clamp_y(ceil(bottom)),
            target_width,
            target_height,
        };
        (!window.is_empty()).then_some(window)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0 || self.target_width == 0 || self.target_height == 0
    }
}

/// How output rows are spaced between the request's north and south edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputGrid {
    /// Rows evenly spaced in latitude
    Geographic,
    /// Rows evenly spaced in Web Mercator y, as map tiles are
    #[default]
    WebMercator,
}

impl OutputGrid {
    /// Longitude/latitude at the center of every output pixel, row-major.
    pub fn pixel_centers(self, bbox: &BoundingBox, width: u32, height: u32) -> Vec<(f64, f64)> {
        let lons: Vec<f64> = (0..width)
            .map(|c| bbox.min_x + (c as f64 + 0.5) / width as f64 * bbox.width())
            .collect();
        let lats: Vec<f64> = (0..height)
            .map(|r| {
                let frac = (r as f64 + 0.5) / height as f64;
                match self {
                    OutputGrid::Geographic => bbox.max_y - frac * bbox.height(),
                    OutputGrid::WebMercator => {
                        let top = lat_to_mercator_y(bbox.max_y);
                        let bottom = lat_to_mercator_y(bbox.min_y);
                        mercator_y_to_lat(top - frac * (top - bottom))
                    }
                }
            })
            .collect();

        let mut centers = Vec::with_capacity((width * height) as usize);
        for lat in &lats {
            centers.extend(lons.iter().map(|lon| (*lon, *lat)));
        }
        centers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        GeoTransform {
            origin_x: 10.0,
            origin_y: 50.0,
            pixel_width: 0.1,
            pixel_height: 0.1,
        }
    }

    #[test]
    fn test_window_inside() {
        let w = PixelWindow::clipped(&transform(), 100, 50, &BoundingBox::new(11.0, 48.0, 12.0, 49.0), 256, 256)
            .unwrap();
        assert_eq!((w.left, w.top, w.right, w.bottom), (10, 10, 20, 20));
        assert_eq!(w.width(), 10);
    }

    #[test]
    fn test_window_clipped_to_source() {
        let w = PixelWindow::clipped(&transform(), 100, 50, &BoundingBox::new(5.0, 40.0, 10.55, 46.0), 256, 256)
            .unwrap();
        assert_eq!((w.left, w.right), (0, 6));
        assert_eq!(w.bottom, 50);
    }

    #[test]
    fn test_window_outside_or_touching() {
        let t = transform();
        assert!(PixelWindow::clipped(&t, 100, 50, &BoundingBox::new(-10.0, 0.0, -5.0, 5.0), 256, 256).is_none());
        // shares only the west edge
        assert!(PixelWindow::clipped(&t, 100, 50, &BoundingBox::new(5.0, 46.0, 10.0, 48.0), 256, 256).is_none());
    }

    #[test]
    fn test_geographic_centers() {
        let centers = OutputGrid::Geographic.pixel_centers(&BoundingBox::new(0.0, 0.0, 2.0, 2.0), 2, 2);
        assert_eq!(centers, vec![(0.5, 1.5), (1.5, 1.5), (0.5, 0.5), (1.5, 0.5)]);
    }

    #[test]
    fn test_mercator_rows_bunch_toward_equator() {
        let centers = OutputGrid::WebMercator.pixel_centers(&BoundingBox::new(0.0, 0.0, 1.0, 80.0), 1, 2);
        let upper = centers[0].1;
        let lower = centers[1].1;
        // evenly spaced in Mercator y, so the upper half spans fewer degrees
        assert!(80.0 - upper < lower);
        assert!(upper > 60.0);
    }
}
