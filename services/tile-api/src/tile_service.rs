//! Tile rendering state machine.
//!
//! resolve coords -> fetch and decode -> colorize -> encode -> respond.
//!
//! Every path ends in a PNG. Data problems (no source, window outside the
//! raster, all no-data) become a transparent `fallback` tile; failures while
//! fetching, decoding or encoding become a transparent `error` tile. The
//! [`TileDiagnostic`] says which, and why.

use std::time::{Duration, Instant};

use cog_reader::{OutputGrid, PixelStats, RasterWindowReader, WindowOutcome, WindowRead};
use geo_common::{BoundingBox, TileCoord};
use metrics::{counter, histogram};
use renderer::{create_png_auto, transparent_png, ColorRamp, MINIMAL_TRANSPARENT_PNG};
use serde::Serialize;
use tracing::{debug, instrument, warn};

pub const REASON_NO_SOURCE: &str = "no source url";
pub const REASON_OUTSIDE: &str = "outside image bounds";
pub const REASON_ALL_NODATA: &str = "all pixels are no-data";
pub const REASON_TIMEOUT: &str = "raster read timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileMode {
    Render,
    Fallback,
    Error,
}

impl TileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileMode::Render => "render",
            TileMode::Fallback => "fallback",
            TileMode::Error => "error",
        }
    }
}

/// Where the outcome was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStage {
    ResolveCoords,
    FetchAndDecode,
    Encode,
}

impl TileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileStage::ResolveCoords => "resolve_coords",
            TileStage::FetchAndDecode => "fetch_and_decode",
            TileStage::Encode => "encode",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TileDiagnostic {
    pub mode: TileMode,
    pub reason: String,
    pub stage: TileStage,
    pub tile: TileCoord,
    pub bounds: BoundingBox,
    pub stats: Option<PixelStats>,
    /// Encoded PNG size
    pub bytes: usize,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
}

impl TileDiagnostic {
    /// `valid=..;nodata=..;min=..;max=..`, or `none` when nothing was decoded.
    pub fn stats_header(&self) -> String {
        match &self.stats {
            None => "none".to_string(),
            Some(s) => {
                let fmt = |v: Option<f32>| v.map_or_else(|| "none".to_string(), |v| format!("{:.2}", v));
                format!("valid={};nodata={};min={};max={}", s.valid, s.nodata, fmt(s.min), fmt(s.max))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub png: Vec<u8>,
    pub diagnostic: TileDiagnostic,
}

pub struct TileService {
    reader: RasterWindowReader,
    ramp: ColorRamp,
    timeout: Duration,
    /// Transparent tile for fallback and error responses
    blank: Vec<u8>,
    blank_size: u32,
}

impl TileService {
    pub fn new(reader: RasterWindowReader, ramp: ColorRamp, timeout: Duration) -> Self {
        let size = reader.config().tile_size;
        let (blank, blank_size) = match transparent_png(size as usize, size as usize) {
            Ok(png) => (png, size),
            Err(e) => {
                warn!(error = %e, "Falling back to 1x1 transparent tile");
                (MINIMAL_TRANSPARENT_PNG.to_vec(), 1)
            }
        };
        Self {
            reader,
            ramp,
            timeout,
            blank,
            blank_size,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.reader.config().tile_size
    }

    #[instrument(skip(self, source_url), fields(tile = %coord.cache_key()))]
    pub async fn render(&self, coord: TileCoord, source_url: Option<&str>) -> RenderedTile {
        let started = Instant::now();
        let bounds = coord.bounds();
        let step = Step {
            coord,
            bounds,
            started,
        };

        let tile = match source_url.map(str::trim).filter(|u| !u.is_empty()) {
            None => self.blank_tile(&step, TileMode::Fallback, REASON_NO_SOURCE, TileStage::ResolveCoords, None),
            Some(url) => self.render_source(&step, url).await,
        };

        let d = &tile.diagnostic;
        counter!("tile_requests_total", "mode" => d.mode.as_str()).increment(1);
        histogram!("tile_render_duration_seconds", "mode" => d.mode.as_str())
            .record(started.elapsed().as_secs_f64());
        histogram!("tile_encoded_bytes").record(d.bytes as f64);
        debug!(mode = d.mode.as_str(), reason = %d.reason, stage = d.stage.as_str(), bytes = d.bytes, "Tile complete");
        tile
    }

    async fn render_source(&self, step: &Step, url: &str) -> RenderedTile {
        let read = match tokio::time::timeout(self.timeout, self.reader.read(url, &step.bounds, OutputGrid::WebMercator)).await
        {
            Err(_) => {
                return self.blank_tile(step, TileMode::Error, REASON_TIMEOUT, TileStage::FetchAndDecode, None);
            }
            Ok(Err(e)) => {
                warn!(error = %e, class = e.class(), "Raster read failed");
                let reason = format!("{}: {}", e.class(), e);
                return self.blank_tile(step, TileMode::Error, &reason, TileStage::FetchAndDecode, None);
            }
            Ok(Ok(WindowOutcome::Outside)) => {
                return self.blank_tile(step, TileMode::Fallback, REASON_OUTSIDE, TileStage::FetchAndDecode, None);
            }
            Ok(Ok(WindowOutcome::Samples(read))) => read,
        };

        if read.stats.all_nodata() {
            return self.blank_tile(
                step,
                TileMode::Fallback,
                REASON_ALL_NODATA,
                TileStage::FetchAndDecode,
                Some(read.stats),
            );
        }

        let pixels = self.colorize(&read);
        match create_png_auto(&pixels, read.width as usize, read.height as usize) {
            Ok(png) => step.finish(
                png,
                TileMode::Render,
                "rendered",
                TileStage::Encode,
                Some(read.stats),
                (read.width, read.height),
            ),
            Err(e) => {
                warn!(error = %e, "PNG encoding failed");
                step.finish(
                    MINIMAL_TRANSPARENT_PNG.to_vec(),
                    TileMode::Error,
                    &format!("encode: {}", e),
                    TileStage::Encode,
                    Some(read.stats),
                    (1, 1),
                )
            }
        }
    }

    fn colorize(&self, read: &WindowRead) -> Vec<u8> {
        self.ramp.colorize_grid(&read.samples, |i, _| read.is_nodata(i))
    }

    fn blank_tile(
        &self,
        step: &Step,
        mode: TileMode,
        reason: &str,
        stage: TileStage,
        stats: Option<PixelStats>,
    ) -> RenderedTile {
        let size = self.blank_size;
        step.finish(self.blank.clone(), mode, reason, stage, stats, (size, size))
    }
}

/// Per-request context carried through the stages.
struct Step {
    coord: TileCoord,
    bounds: BoundingBox,
    started: Instant,
}

impl Step {
    fn finish(
        &self,
        png: Vec<u8>,
        mode: TileMode,
        reason: &str,
        stage: TileStage,
        stats: Option<PixelStats>,
        (width, height): (u32, u32),
    ) -> RenderedTile {
        let diagnostic = TileDiagnostic {
            mode,
            reason: reason.to_string(),
            stage,
            tile: self.coord,
            bounds: self.bounds,
            stats,
            bytes: png.len(),
            width,
            height,
            duration_ms: self.started.elapsed().as_millis() as u64,
        };
        RenderedTile { png, diagnostic }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_header() {
        let mut d = TileDiagnostic {
            mode: TileMode::Render,
            reason: "rendered".into(),
            stage: TileStage::Encode,
            tile: TileCoord::new(0, 0, 0),
            bounds: BoundingBox::new(-180.0, -85.0, 180.0, 85.0),
            stats: Some(PixelStats {
                valid: 10,
                nodata: 2,
                min: Some(281.5),
                max: Some(300.25),
            }),
            bytes: 100,
            width: 256,
            height: 256,
            duration_ms: 3,
        };
        assert_eq!(d.stats_header(), "valid=10;nodata=2;min=281.50;max=300.25");

        d.stats = None;
        assert_eq!(d.stats_header(), "none");
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_value(TileMode::Fallback).unwrap(), "fallback");
        assert_eq!(serde_json::to_value(TileStage::FetchAndDecode).unwrap(), "fetch_and_decode");
    }
}
