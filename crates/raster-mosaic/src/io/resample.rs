//! Boundless window resampling shared by the reader backends.

use crate::aggregate::is_nodata;
use crate::config::ResampleMethod;
use crate::types::{Bounds, GeoTransform, RasterBuffer, SourceRaster};

/// Half-open pixel rectangle `[col0, col1) × [row0, row1)` of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelSpan {
    pub col0: usize,
    pub row0: usize,
    pub col1: usize,
    pub row1: usize,
}

impl PixelSpan {
    pub fn width(&self) -> usize {
        self.col1 - self.col0
    }

    pub fn height(&self) -> usize {
        self.row1 - self.row0
    }
}

/// Source pixels needed to serve `window`, with a one-pixel margin for
/// bilinear sampling. `None` when the window misses the source entirely.
pub fn source_span(
    transform: &GeoTransform,
    width: usize,
    height: usize,
    window: &Bounds,
) -> Option<PixelSpan> {
    let (left, top) = transform.geo_to_pixel(window.left, window.top);
    let (right, bottom) = transform.geo_to_pixel(window.right, window.bottom);

    let col0 = (left.floor() - 1.0).max(0.0);
    let row0 = (top.floor() - 1.0).max(0.0);
    let col1 = (right.ceil() + 1.0).min(width as f64);
    let row1 = (bottom.ceil() + 1.0).min(height as f64);

    if !(col0 < col1 && row0 < row1) {
        return None;
    }

    Some(PixelSpan {
        col0: col0 as usize,
        row0: row0 as usize,
        col1: col1 as usize,
        row1: row1 as usize,
    })
}

/// Decoded source pixels covering a [`PixelSpan`].
#[derive(Debug, Clone)]
pub struct SourcePatch {
    pub span: PixelSpan,
    pub data: RasterBuffer,
}

impl SourcePatch {
    /// Copy only the pixels under `span` out of a whole-source buffer.
    pub fn crop(source: &RasterBuffer, span: PixelSpan) -> Self {
        let mut data = Vec::with_capacity(source.bands * span.width() * span.height());
        for band in 0..source.bands {
            let pixels = source.band(band);
            for row in span.row0..span.row1 {
                let start = row * source.width;
                data.extend_from_slice(&pixels[start + span.col0..start + span.col1]);
            }
        }

        Self {
            span,
            data: RasterBuffer {
                bands: source.bands,
                width: span.width(),
                height: span.height(),
                data,
            },
        }
    }

    /// Value at source pixel (col, row), if the patch covers it.
    #[inline]
    fn value(&self, band: usize, col: usize, row: usize) -> Option<f64> {
        if col < self.span.col0 || row < self.span.row0 {
            return None;
        }
        self.data
            .get(band, col - self.span.col0, row - self.span.row0)
    }
}

/// Resample `patch` into the output pixel grid laid over `window`.
///
/// Output pixel centres falling outside the source, or on source nodata,
/// receive `fill_value`.
pub fn resample_window(
    source: &SourceRaster,
    patch: &SourcePatch,
    window: &Bounds,
    out_width: usize,
    out_height: usize,
    fill_value: f64,
    method: ResampleMethod,
) -> RasterBuffer {
    let mut out = RasterBuffer::filled(source.band_count, out_width, out_height, fill_value);
    if out_width == 0 || out_height == 0 {
        return out;
    }

    let (src_w, src_h) = source.shape();
    let transform = source.transform();
    let step_x = window.width() / out_width as f64;
    let step_y = window.height() / out_height as f64;

    let sample = |band: usize, col: usize, row: usize| -> Option<f64> {
        let v = patch.value(band, col, row)?;
        match source.nodata {
            Some(nd) if is_nodata(v, nd) => None,
            _ => Some(v),
        }
    };

    for row in 0..out_height {
        let y = window.top - (row as f64 + 0.5) * step_y;
        for col in 0..out_width {
            let x = window.left + (col as f64 + 0.5) * step_x;
            let (fc, fr) = transform.geo_to_pixel(x, y);
            if fc < 0.0 || fr < 0.0 || fc >= src_w as f64 || fr >= src_h as f64 {
                continue;
            }

            for band in 0..source.band_count {
                let value = match method {
                    ResampleMethod::Nearest => sample(band, fc as usize, fr as usize),
                    ResampleMethod::Bilinear => bilinear(&sample, band, fc, fr, src_w, src_h)
                        .or_else(|| sample(band, fc as usize, fr as usize)),
                };
                if let Some(v) = value {
                    out.set(band, col, row, v);
                }
            }
        }
    }

    out
}

/// Bilinear interpolation between the four pixel centres around (fc, fr).
///
/// Returns `None` if any corner is nodata so the caller can fall back to
/// nearest.
fn bilinear(
    sample: &impl Fn(usize, usize, usize) -> Option<f64>,
    band: usize,
    fc: f64,
    fr: f64,
    width: usize,
    height: usize,
) -> Option<f64> {
    let u = (fc - 0.5).max(0.0);
    let v = (fr - 0.5).max(0.0);
    let x0 = (u.floor() as usize).min(width - 1);
    let y0 = (v.floor() as usize).min(height - 1);
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let tx = (u - x0 as f64).clamp(0.0, 1.0);
    let ty = (v - y0 as f64).clamp(0.0, 1.0);

    let v00 = sample(band, x0, y0)?;
    let v10 = sample(band, x1, y0)?;
    let v01 = sample(band, x0, y1)?;
    let v11 = sample(band, x1, y1)?;

    let top = v00 * (1.0 - tx) + v10 * tx;
    let bottom = v01 * (1.0 - tx) + v11 * tx;
    Some(top * (1.0 - ty) + bottom * ty)
}
