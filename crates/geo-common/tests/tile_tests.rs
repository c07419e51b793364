//! Tests for XYZ tile math.

use geo_common::tile::{latlon_to_tile, tile_to_latlon_bounds, MERCATOR_MAX_LAT};
use geo_common::TileCoord;

// ============================================================================
// Inverse / round-trip tests
// ============================================================================

#[test]
fn test_tile_center_maps_back_to_tile() {
    for z in [0u32, 1, 5, 10, 15, 20] {
        let n = TileCoord::tiles_at_zoom(z);
        for (x, y) in [(0, 0), (n - 1, n - 1), (n / 2, n / 3), (n / 7, n - 1)] {
            let coord = TileCoord::new(z, x, y);
            let bounds = tile_to_latlon_bounds(&coord);
            let (lon, lat) = bounds.center();
            assert_eq!(latlon_to_tile(lat, lon, z), coord, "z={} x={} y={}", z, x, y);
        }
    }
}

#[test]
fn test_tile_corners_recover_extent() {
    let coord = TileCoord::new(12, 2176, 1420);
    let b = tile_to_latlon_bounds(&coord);
    let eps = 1e-9;

    // Nudge inside each corner; all four must land in the same tile
    for (lon, lat) in [
        (b.min_x + eps, b.max_y - eps),
        (b.max_x - eps, b.max_y - eps),
        (b.min_x + eps, b.min_y + eps),
        (b.max_x - eps, b.min_y + eps),
    ] {
        assert_eq!(latlon_to_tile(lat, lon, 12), coord);
    }
}

// ============================================================================
// Adjacency tests
// ============================================================================

#[test]
fn test_adjacent_tiles_share_edges_exactly() {
    for z in [1u32, 8, 17] {
        let n = TileCoord::tiles_at_zoom(z);
        for x in [0, n / 2, n - 2] {
            let y = n / 2;
            let left = tile_to_latlon_bounds(&TileCoord::new(z, x, y));
            let right = tile_to_latlon_bounds(&TileCoord::new(z, x + 1, y));
            assert_eq!(left.max_x, right.min_x);
            assert_eq!(left.min_y, right.min_y);
            assert_eq!(left.max_y, right.max_y);

            let below = tile_to_latlon_bounds(&TileCoord::new(z, x, y + 1));
            assert_eq!(left.min_y, below.max_y);
        }
    }
}

// ============================================================================
// Edge cases
// ============================================================================

#[test]
fn test_world_edges_clamp_into_last_tile() {
    let t = latlon_to_tile(-90.0, 180.0, 3);
    assert_eq!(t, TileCoord::new(3, 7, 7));
    let t = latlon_to_tile(90.0, -180.0, 3);
    assert_eq!(t, TileCoord::new(3, 0, 0));
}

#[test]
fn test_zoom_one_quadrants() {
    let nw = tile_to_latlon_bounds(&TileCoord::new(1, 0, 0));
    assert_eq!(nw.min_x, -180.0);
    assert_eq!(nw.max_x, 0.0);
    assert!(nw.min_y.abs() < 1e-12);
    assert!((nw.max_y - MERCATOR_MAX_LAT).abs() < 1e-9);
}
