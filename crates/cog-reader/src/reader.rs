//! Windowed, resampled reads from a cloud-optimized GeoTIFF.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt, TryStreamExt};
use geo_common::BoundingBox;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use upstream::UpstreamClient;

use crate::decode::BlockDecoder;
use crate::geo::{detect_crs, Crs, GeoTransform};
use crate::source::{HttpRangeSource, RangeSource};
use crate::tiff::{ImageDirectory, Prefetched};
use crate::window::{OutputGrid, PixelWindow};
use crate::{CogError, CogResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Output width and height in pixels
    pub tile_size: u32,
    /// Bytes fetched up front to cover the header and IFD
    pub header_prefetch: u64,
    /// Reads that would need more source blocks than this fail
    pub max_blocks: usize,
    /// Concurrent block fetches per read
    pub concurrency: usize,
    /// Samples below this value are treated as no-data
    pub physical_floor: Option<f64>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            header_prefetch: 16 * 1024,
            max_blocks: 64,
            concurrency: 8,
            physical_floor: None,
        }
    }
}

/// Decides which samples carry no valid measurement.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct NoDataPolicy {
    /// The raster's declared nodata value
    pub nodata_value: Option<f64>,
    pub physical_floor: Option<f64>,
}

impl NoDataPolicy {
    /// Non-finite, non-positive, below the floor, or the declared nodata value.
    pub fn is_nodata(&self, v: f32) -> bool {
        if !v.is_finite() || v <= 0.0 {
            return true;
        }
        let v = v as f64;
        if matches!(self.physical_floor, Some(floor) if v < floor) {
            return true;
        }
        matches!(self.nodata_value, Some(nd) if (v - nd).abs() < f64::EPSILON * nd.abs().max(1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PixelStats {
    pub valid: usize,
    pub nodata: usize,
    /// Over valid samples only; `None` when there are none
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl PixelStats {
    pub fn compute(samples: &[f32], policy: &NoDataPolicy) -> Self {
        let mut stats = PixelStats::default();
        for &v in samples {
            if policy.is_nodata(v) {
                stats.nodata += 1;
                continue;
            }
            stats.valid += 1;
            stats.min = Some(stats.min.map_or(v, |m| m.min(v)));
            stats.max = Some(stats.max.map_or(v, |m| m.max(v)));
        }
        stats
    }

    pub fn all_nodata(&self) -> bool {
        self.valid == 0
    }
}

/// Samples resampled onto the output grid, row-major, in physical units.
#[derive(Debug, Clone)]
pub struct WindowRead {
    pub samples: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub window: PixelWindow,
    pub nodata: NoDataPolicy,
    pub stats: PixelStats,
}

impl WindowRead {
    pub fn is_nodata(&self, index: usize) -> bool {
        self.samples.get(index).map_or(true, |v| self.nodata.is_nodata(*v))
    }
}

#[derive(Debug, Clone)]
pub enum WindowOutcome {
    /// The request does not overlap the raster
    Outside,
    Samples(WindowRead),
}

/// Static facts about an opened raster.
#[derive(Debug, Clone, Serialize)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
    pub epsg: u32,
    /// Lon/lat extent
    pub bounds: BoundingBox,
    pub nodata_value: Option<f64>,
    pub tiled: bool,
    pub block_width: u32,
    pub block_height: u32,
}

/// An opened raster: parsed directory plus the source it was read from.
pub struct CogReader {
    source: Arc<dyn RangeSource>,
    config: ReaderConfig,
    directory: ImageDirectory,
    decoder: BlockDecoder,
    transform: GeoTransform,
    crs: Crs,
}

impl CogReader {
    /// Read the header and first IFD. Only the prefetch and any tag values
    /// beyond it are fetched.
    pub async fn open(source: Arc<dyn RangeSource>, config: ReaderConfig) -> CogResult<Self> {
        let prefix = source.read_prefix(config.header_prefetch.max(8)).await?;
        let data = Prefetched::new(source.as_ref(), prefix);
        let (order, directory) = ImageDirectory::read(&data).await?;

        let decoder = BlockDecoder::new(order, &directory)?;
        let transform = GeoTransform::from_directory(&directory)?;
        let crs = detect_crs(&directory, &transform)?;

        debug!(
            source = %source.describe(),
            width = directory.width,
            height = directory.height,
            tiled = directory.tiled,
            epsg = crs.epsg(),
            "Opened raster"
        );

        Ok(Self {
            source,
            config,
            directory,
            decoder,
            transform,
            crs,
        })
    }

    pub fn info(&self) -> RasterInfo {
        let d = &self.directory;
        RasterInfo {
            width: d.width,
            height: d.height,
            epsg: self.crs.epsg(),
            bounds: self.crs.bbox_to_lonlat(&self.native_bounds()),
            nodata_value: d.nodata(),
            tiled: d.tiled,
            block_width: d.block_width,
            block_height: d.block_height,
        }
    }

    pub fn native_bounds(&self) -> BoundingBox {
        self.transform.bounds(self.directory.width, self.directory.height)
    }

    pub fn nodata_policy(&self) -> NoDataPolicy {
        NoDataPolicy {
            nodata_value: self.directory.nodata(),
            physical_floor: self.config.physical_floor,
        }
    }

    /// The source window a lon/lat request touches, if any.
    pub fn window_for(&self, bbox: &BoundingBox) -> Option<PixelWindow> {
        let size = self.config.tile_size;
        PixelWindow::clipped(
            &self.transform,
            self.directory.width,
            self.directory.height,
            &self.crs.bbox_from_lonlat(bbox),
            size,
            size,
        )
    }

    /// Nearest-neighbour resample of `bbox` onto a `tile_size` square grid.
    pub async fn read_window(&self, bbox: &BoundingBox, grid: OutputGrid) -> CogResult<WindowOutcome> {
        let Some(window) = self.window_for(bbox) else {
            return Ok(WindowOutcome::Outside);
        };
        let (width, height) = (window.target_width, window.target_height);
        let dir = &self.directory;

        // source pixel index for each output pixel
        let lookups: Vec<Option<(u32, u32)>> = grid
            .pixel_centers(bbox, width, height)
            .into_iter()
            .map(|(lon, lat)| {
                let (x, y) = self.crs.from_lonlat(lon, lat);
                let (col, row) = self.transform.to_pixel(x, y);
                let inside = col >= 0.0 && row >= 0.0 && col < dir.width as f64 && row < dir.height as f64;
                inside.then(|| (col as u32, row as u32))
            })
            .collect();

        let needed: BTreeSet<usize> = lookups
            .iter()
            .flatten()
            .map(|&(col, row)| self.block_index(col, row))
            .collect();
        if needed.len() > self.config.max_blocks {
            return Err(CogError::TooManyBlocks {
                needed: needed.len(),
                limit: self.config.max_blocks,
            });
        }

        let started = Instant::now();
        let blocks = self.fetch_blocks(&needed).await?;
        histogram!("cog_blocks_per_read").record(needed.len() as f64);
        histogram!("cog_block_fetch_seconds").record(started.elapsed().as_secs_f64());

        let bw = dir.block_width;
        let samples: Vec<f32> = lookups
            .iter()
            .map(|lookup| {
                let Some((col, row)) = *lookup else {
                    return f32::NAN;
                };
                let block = self.block_index(col, row);
                let offset = ((row % dir.block_height) * bw + col % bw) as usize;
                blocks
                    .get(&block)
                    .and_then(|b| b.as_ref())
                    .and_then(|b| b.get(offset))
                    .map_or(f32::NAN, |v| *v as f32)
            })
            .collect();

        let nodata = self.nodata_policy();
        let stats = PixelStats::compute(&samples, &nodata);
        Ok(WindowOutcome::Samples(WindowRead {
            samples,
            width,
            height,
            window,
            nodata,
            stats,
        }))
    }

    fn block_index(&self, col: u32, row: u32) -> usize {
        let d = &self.directory;
        ((row / d.block_height) * d.blocks_across() + col / d.block_width) as usize
    }

    /// Fetch and decode blocks concurrently. Blocks with no stored bytes are
    /// `None` (sparse files).
    async fn fetch_blocks(&self, needed: &BTreeSet<usize>) -> CogResult<HashMap<usize, Option<Vec<f64>>>> {
        let indices: Vec<usize> = needed.iter().copied().collect();
        stream::iter(indices)
            .map(|index| self.fetch_block(index))
            .buffer_unordered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    async fn fetch_block(&self, index: usize) -> CogResult<(usize, Option<Vec<f64>>)> {
        let dir = &self.directory;
        let (Some(&offset), Some(&length)) = (dir.block_offsets.get(index), dir.block_byte_counts.get(index)) else {
            return Err(CogError::InvalidStructure(format!("block {} missing from directory", index)));
        };
        if length == 0 {
            return Ok((index, None));
        }
        let stored = self.source.read_range(offset, length).await?;
        counter!("cog_blocks_fetched_total").increment(1);
        let block_row = index as u32 / dir.blocks_across();
        let rows = dir.rows_in_block(block_row) as usize;
        let decoded = self.decoder.decode(&stored, rows)?;
        Ok((index, Some(decoded)))
    }
}

/// Opens remote rasters through the shared upstream client.
#[derive(Clone)]
pub struct RasterWindowReader {
    client: UpstreamClient,
    config: ReaderConfig,
}

impl RasterWindowReader {
    pub fn new(client: UpstreamClient, config: ReaderConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Read the part of the raster at `url` covering `bbox`. Hosts outside the
    /// allow-list fail before any request is made.
    #[instrument(skip(self, bbox), fields(bbox = %bbox.cache_key()))]
    pub async fn read(&self, url: &str, bbox: &BoundingBox, grid: OutputGrid) -> CogResult<WindowOutcome> {
        let source = HttpRangeSource::new(self.client.clone(), url)?;
        let reader = CogReader::open(Arc::new(source), self.config.clone()).await?;
        reader.read_window(bbox, grid).await
    }
}
