//! Windowed reads from cloud-optimized GeoTIFFs.
//!
//! A raster is opened with one ranged read covering the header and first
//! IFD. A read then resamples a lon/lat box onto a fixed output grid,
//! fetching only the blocks that hold sampled pixels. Nothing is ever
//! downloaded in full.

pub mod decode;
pub mod error;
pub mod geo;
pub mod reader;
pub mod source;
pub mod tiff;
pub mod window;

pub use error::{CogError, CogResult};
pub use geo::{Crs, GeoTransform};
pub use reader::{
    CogReader, NoDataPolicy, PixelStats, RasterInfo, RasterWindowReader, ReaderConfig, WindowOutcome, WindowRead,
};
pub use source::{HttpRangeSource, MemorySource, RangeSource};
pub use window::{OutputGrid, PixelWindow};
