//! Color ramp rendering for single-band rasters.
//!
//! Values are normalized against a fixed domain, clamped, and mapped through
//! a four-segment ramp: blue, cyan, green, yellow, red. No-data samples come
//! out fully transparent.

use serde::{Deserialize, Serialize};

/// Color value in RGBA format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn transparent() -> Self {
        Self { r: 0, g: 0, b: 0, a: 0 }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Ramp stops at t = 0, 0.25, 0.5, 0.75 and 1.
const STOPS: [(u8, u8, u8); 5] = [
    (0, 0, 255),   // blue
    (0, 255, 255), // cyan
    (0, 255, 0),   // green
    (255, 255, 0), // yellow
    (255, 0, 0),   // red
];

/// Linear color interpolation, rounded to the nearest channel value
pub fn interpolate_color(color1: Color, color2: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;

    Color::new(
        mix(color1.r, color2.r),
        mix(color1.g, color2.g),
        mix(color1.b, color2.b),
        mix(color1.a, color2.a),
    )
}

/// Ramp color at normalized position `t`. Values outside [0, 1] clamp to
/// the end stops; NaN maps to the first stop.
pub fn ramp_color(t: f32, alpha: u8) -> Color {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let scaled = t * 4.0;
    let segment = (scaled.floor() as usize).min(3);
    let local = scaled - segment as f32;

    let (r1, g1, b1) = STOPS[segment];
    let (r2, g2, b2) = STOPS[segment + 1];
    interpolate_color(Color::new(r1, g1, b1, alpha), Color::new(r2, g2, b2, alpha), local)
}

/// A value domain plus the opacity of valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRamp {
    pub domain_min: f32,
    pub domain_max: f32,
    pub alpha: u8,
}

impl Default for ColorRamp {
    /// Land surface temperature in Kelvin
    fn default() -> Self {
        Self {
            domain_min: 270.0,
            domain_max: 330.0,
            alpha: 220,
        }
    }
}

impl ColorRamp {
    pub fn new(domain_min: f32, domain_max: f32, alpha: u8) -> Self {
        Self {
            domain_min,
            domain_max,
            alpha,
        }
    }

    /// Position of `value` within the domain, clamped to [0, 1].
    pub fn normalize(&self, value: f32) -> f32 {
        let range = self.domain_max - self.domain_min;
        let range = if range.abs() < f32::EPSILON { 1.0 } else { range };
        ((value - self.domain_min) / range).clamp(0.0, 1.0)
    }

    pub fn colorize(&self, value: f32, nodata: bool) -> Color {
        if nodata {
            return Color::transparent();
        }
        ramp_color(self.normalize(value), self.alpha)
    }

    /// Render a row-major grid as RGBA pixel data (4 bytes per pixel).
    pub fn colorize_grid<F>(&self, data: &[f32], is_nodata: F) -> Vec<u8>
    where
        F: Fn(usize, f32) -> bool,
    {
        let mut pixels = Vec::with_capacity(data.len() * 4);
        for (idx, &value) in data.iter().enumerate() {
            pixels.extend_from_slice(&self.colorize(value, is_nodata(idx, value)).to_array());
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_rounds() {
        let c = interpolate_color(Color::new(0, 0, 0, 255), Color::new(255, 255, 255, 255), 0.5);
        assert_eq!(c, Color::new(128, 128, 128, 255));
    }

    #[test]
    fn test_degenerate_domain() {
        let ramp = ColorRamp::new(300.0, 300.0, 255);
        assert_eq!(ramp.normalize(299.0), 0.0);
        assert_eq!(ramp.normalize(301.0), 1.0);
    }

    #[test]
    fn test_nan_maps_to_first_stop() {
        assert_eq!(ramp_color(f32::NAN, 255), Color::new(0, 0, 255, 255));
    }
}
