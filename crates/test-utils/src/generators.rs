//! Synthetic raster value generators.
//!
//! All generators return band-major, row-major `Vec<f64>` buffers
//! (band 0 row 0 first), the layout of a `[bands, rows, cols]` array.

/// Predictable values: `band * 1_000_000 + col * 1000 + row`.
///
/// Any pixel can be checked after a round trip without keeping the input.
///
/// ```
/// use test_utils::ramp_raster;
///
/// let data = ramp_raster(1, 10, 5);
/// assert_eq!(data.len(), 50);
/// assert_eq!(data[1], 1000.0);  // col=1, row=0
/// assert_eq!(data[10], 1.0);    // col=0, row=1
/// ```
pub fn ramp_raster(bands: usize, width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(bands * width * height);
    for band in 0..bands {
        for row in 0..height {
            for col in 0..width {
                data.push((band * 1_000_000 + col * 1000 + row) as f64);
            }
        }
    }
    data
}

/// Expected [`ramp_raster`] value at a pixel.
pub fn ramp_value(band: usize, col: usize, row: usize) -> f64 {
    (band * 1_000_000 + col * 1000 + row) as f64
}

/// Every pixel of every band set to `value`.
pub fn constant_raster(bands: usize, width: usize, height: usize, value: f64) -> Vec<f64> {
    vec![value; bands * width * height]
}

/// Terrain-like single band: a smooth dome peaking in the centre.
///
/// Values range from `base` at the corners to roughly `base + relief`.
pub fn dome_raster(width: usize, height: usize, base: f64, relief: f64) -> Vec<f64> {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let max_d = (cx * cx + cy * cy).sqrt().max(1.0);

    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let dx = col as f64 - cx;
            let dy = row as f64 - cy;
            let d = (dx * dx + dy * dy).sqrt() / max_d;
            data.push(base + relief * (1.0 - d * d));
        }
    }
    data
}

/// Replace every `stride`-th pixel (in flat order) with `nodata`.
pub fn punch_nodata(data: &mut [f64], stride: usize, nodata: f64) {
    if stride == 0 {
        return;
    }
    for v in data.iter_mut().step_by(stride) {
        *v = nodata;
    }
}

/// Set a rectangular block of one band to `value`.
#[allow(clippy::too_many_arguments)]
pub fn fill_rect(
    data: &mut [f64],
    width: usize,
    height: usize,
    band: usize,
    col0: usize,
    row0: usize,
    w: usize,
    h: usize,
    value: f64,
) {
    let band_offset = band * width * height;
    for row in row0..(row0 + h).min(height) {
        for col in col0..(col0 + w).min(width) {
            data[band_offset + row * width + col] = value;
        }
    }
}

/// Deterministic pseudo-random values in `[lo, hi)` (xorshift, seeded).
pub fn noise_raster(width: usize, height: usize, seed: u64, lo: f64, hi: f64) -> Vec<f64> {
    let mut state = seed.max(1);
    (0..width * height)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            lo + (state % 1_000_000) as f64 / 1_000_000.0 * (hi - lo)
        })
        .collect()
}
