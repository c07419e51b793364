//! Tile rendering for single-band rasters.
//!
//! - Color ramp (`gradient`): values to RGBA, no-data transparent
//! - PNG encoding (`png`): indexed or RGBA, written directly with zlib + CRC-32

pub mod gradient;
pub mod png;

pub use gradient::{Color, ColorRamp};
pub use png::{create_png, create_png_auto, transparent_png, EncodeError, MINIMAL_TRANSPARENT_PNG};
