//! Common types and utilities shared across the granule discovery and tiling crates.

pub mod bbox;
pub mod error;
pub mod granule;
pub mod tile;
pub mod time;

pub use bbox::{haversine_km, BoundingBox};
pub use error::{GeoError, GeoResult};
pub use granule::{Granule, GranuleFilters, RegionQuery, ScoredGranule};
pub use tile::{TileCoord, MAX_ZOOM};
pub use time::TimeWindow;
