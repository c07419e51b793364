//! Synthetic value grids and pixel buffers.

/// Row-major grid where each cell is `col * 1000 + row`.
///
/// Makes it easy to check which source pixel ended up where:
///
/// ```
/// use test_utils::create_index_grid;
///
/// let grid = create_index_grid(10, 5);
/// assert_eq!(grid[1], 1000.0);
/// assert_eq!(grid[10], 1.0);
/// ```
pub fn create_index_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Land-surface-temperature-like values in Kelvin, warming left to right
/// from `min` to `max`.
pub fn create_lst_grid(width: usize, height: usize, min: f64, max: f64) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for _row in 0..height {
        for col in 0..width {
            let t = col as f64 / (width.max(2) - 1) as f64;
            data.push(min + t * (max - min));
        }
    }
    data
}

/// A grid with every value set to `value`.
pub fn create_constant_grid(width: usize, height: usize, value: f64) -> Vec<f64> {
    vec![value; width * height]
}

/// Replace every `stride`-th cell with `nodata`.
pub fn punch_nodata(mut grid: Vec<f64>, stride: usize, nodata: f64) -> Vec<f64> {
    for v in grid.iter_mut().step_by(stride.max(1)) {
        *v = nodata;
    }
    grid
}

/// RGBA gradient: red ramps across, green ramps down, alpha alternates.
pub fn create_rgba_gradient(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.push((x * 255 / width.max(1)) as u8);
            pixels.push((y * 255 / height.max(1)) as u8);
            pixels.push(128);
            pixels.push(if (x + y) % 2 == 0 { 255 } else { 100 });
        }
    }
    pixels
}
