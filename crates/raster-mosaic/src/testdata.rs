//! Test data generation utilities.
//!
//! Writes small Zarr source rasters with known values and provides an
//! observer that records scheduler events, for unit and integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use zarrs::array::{ArrayBuilder, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use crate::io::zarr::{data_type_of, nodata_to_json};
use crate::scheduler::MergeObserver;
use crate::types::{Bounds, PixelType, RasterBuffer, Resolution, SourceRaster};

/// A synthetic source raster: metadata plus band-major pixel values.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    pub nodata: Option<f64>,
    pub crs: Option<String>,
    pub data: Vec<f64>,
}

impl SourceSpec {
    /// Single-band float32 raster over `bounds`.
    pub fn new(bounds: Bounds, width: usize, height: usize, data: Vec<f64>) -> Self {
        Self {
            bounds,
            width,
            height,
            bands: 1,
            pixel_type: PixelType::Float32,
            nodata: None,
            crs: None,
            data,
        }
    }

    /// Single-band raster with every pixel set to `value`.
    pub fn constant(bounds: Bounds, width: usize, height: usize, value: f64) -> Self {
        Self::new(bounds, width, height, vec![value; width * height])
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    /// Multi-band data; `data.len()` must be `bands * width * height`.
    pub fn with_bands(mut self, bands: usize, data: Vec<f64>) -> Self {
        self.bands = bands;
        self.data = data;
        self
    }

    /// Set one pixel of band 0.
    pub fn set(&mut self, col: usize, row: usize, value: f64) {
        self.data[row * self.width + col] = value;
    }

    /// Metadata as a reader would report it for `path`.
    pub fn source_raster(&self, path: impl Into<PathBuf>) -> SourceRaster {
        SourceRaster {
            path: path.into(),
            bounds: self.bounds,
            resolution: Resolution::new(
                self.bounds.width() / self.width as f64,
                self.bounds.height() / self.height as f64,
            ),
            band_count: self.bands,
            pixel_type: self.pixel_type,
            nodata: self.nodata,
            crs: self.crs.clone(),
        }
    }

    /// Pixel values as a [`RasterBuffer`].
    pub fn buffer(&self) -> Option<RasterBuffer> {
        RasterBuffer::from_vec(self.bands, self.width, self.height, self.data.clone())
    }
}

/// Write `spec` as a `[bands, rows, cols]` Zarr array at `path`.
pub fn write_source_zarr(
    path: &Path,
    spec: &SourceSpec,
    chunk_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(path)?;
    let store = Arc::new(FilesystemStore::new(path)?);

    let chunk = chunk_size.max(1) as u64;
    let array = ArrayBuilder::new(
        vec![spec.bands as u64, spec.height as u64, spec.width as u64],
        data_type_of(spec.pixel_type),
        vec![spec.bands as u64, chunk, chunk].try_into()?,
        fill_value(spec.pixel_type),
    )
    .attributes({
        let mut attrs = serde_json::Map::new();
        attrs.insert("bounds".to_string(), spec.bounds.to_json());
        attrs.insert("crs".to_string(), serde_json::json!(spec.crs));
        attrs.insert("nodata".to_string(), nodata_to_json(spec.nodata));
        attrs
    })
    .build(store.clone(), "/")?;

    array.store_metadata()?;

    let subset = ArraySubset::new_with_start_shape(
        vec![0, 0, 0],
        vec![spec.bands as u64, spec.height as u64, spec.width as u64],
    )?;

    macro_rules! store_as {
        ($t:ty) => {{
            let typed: Vec<$t> = spec.data.iter().map(|&v| v as $t).collect();
            array.store_array_subset_elements::<$t>(&subset, &typed)
        }};
    }

    match spec.pixel_type {
        PixelType::UInt8 => store_as!(u8),
        PixelType::Int16 => store_as!(i16),
        PixelType::UInt16 => store_as!(u16),
        PixelType::Int32 => store_as!(i32),
        PixelType::UInt32 => store_as!(u32),
        PixelType::Float32 => store_as!(f32),
        PixelType::Float64 => store_as!(f64),
    }?;

    Ok(())
}

fn fill_value(pixel_type: PixelType) -> FillValue {
    match pixel_type {
        PixelType::UInt8 => FillValue::from(0u8),
        PixelType::Int16 => FillValue::from(0i16),
        PixelType::UInt16 => FillValue::from(0u16),
        PixelType::Int32 => FillValue::from(0i32),
        PixelType::UInt32 => FillValue::from(0u32),
        PixelType::Float32 => FillValue::from(f32::NAN),
        PixelType::Float64 => FillValue::from(f64::NAN),
    }
}

/// Observer that records every event, optionally cancelling after a number
/// of progress reports.
#[derive(Default)]
pub struct RecordingObserver {
    logs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    progress: Mutex<Vec<u8>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` once `writes` progress reports have been received.
    pub fn cancelling_after(writes: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((writes, token)),
            ..Default::default()
        }
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn progress_reports(&self) -> Vec<u8> {
        self.progress.lock().clone()
    }
}

impl MergeObserver for RecordingObserver {
    fn log(&self, message: &str) {
        self.logs.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn progress(&self, percent: u8) {
        let mut progress = self.progress.lock();
        progress.push(percent);
        if let Some((writes, token)) = &self.cancel_after {
            if progress.len() >= *writes {
                token.cancel();
            }
        }
    }
}
