//! HTTP request handlers.
//!
//! - `tiles`: XYZ tile rendering
//! - `discovery`: granule discovery API
//! - `metrics`: health check and Prometheus metrics
//! - `common`: shared response helpers

pub mod common;
pub mod discovery;
pub mod metrics;
pub mod tiles;

pub use discovery::granules_handler;
pub use metrics::{health_handler, metrics_handler};
pub use tiles::{parse_tile_path, tile_handler, TileParams};
