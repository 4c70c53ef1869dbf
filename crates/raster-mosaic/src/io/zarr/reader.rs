//! Zarr source reader with a shared block cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::{nodata_from_json, pixel_type_of};
use crate::cache::{hash_path, BlockCache, CacheStats};
use crate::config::ResampleMethod;
use crate::error::{MosaicError, Result};
use crate::io::resample::{resample_window, source_span, PixelSpan, SourcePatch};
use crate::io::RasterReader;
use crate::types::{Bounds, PixelType, RasterBuffer, Resolution, SourceRaster};

/// Edge length of the square source blocks decoded into the cache.
pub const READ_BLOCK_SIZE: usize = 256;

/// An opened source array.
struct OpenedArray {
    array: Array<FilesystemStore>,
    path: PathBuf,
    path_hash: u64,
    /// `[rows, cols]` arrays carry no band axis.
    banded: bool,
    bands: usize,
    rows: usize,
    cols: usize,
    pixel_type: PixelType,
}

/// [`RasterReader`] over Zarr V3 arrays.
///
/// Opened arrays and decoded blocks are shared by every tile worker.
pub struct ZarrRasterReader {
    arrays: RwLock<HashMap<PathBuf, Arc<OpenedArray>>>,
    block_cache: Mutex<BlockCache>,
    block_size: usize,
    resampling: ResampleMethod,
}

impl ZarrRasterReader {
    /// Create a reader whose block cache holds at most `cache_size_bytes`.
    pub fn new(cache_size_bytes: usize, resampling: ResampleMethod) -> Self {
        Self {
            arrays: RwLock::new(HashMap::new()),
            block_cache: Mutex::new(BlockCache::new(cache_size_bytes)),
            block_size: READ_BLOCK_SIZE,
            resampling,
        }
    }

    /// Override the decode block edge length.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.block_cache.lock().stats()
    }

    /// Forget opened arrays and decoded blocks.
    ///
    /// Cached state is keyed by path only, so a source rewritten in place is
    /// only seen after a reset. Hit and miss counters are kept.
    pub fn reset(&self) {
        let arrays = std::mem::take(&mut *self.arrays.write());
        self.block_cache.lock().clear();
        debug!(arrays = arrays.len(), "Reset source reader");
    }

    /// Number of source arrays currently held open.
    pub fn open_arrays(&self) -> usize {
        self.arrays.read().len()
    }

    fn open_array(&self, path: &Path) -> Result<Arc<OpenedArray>> {
        if let Some(opened) = self.arrays.read().get(path) {
            return Ok(Arc::clone(opened));
        }

        let unreadable = |reason: String| MosaicError::unreadable(path.display().to_string(), reason);

        let store = FilesystemStore::new(path).map_err(|e| unreadable(e.to_string()))?;
        let array = Array::open(Arc::new(store), "/").map_err(|e| unreadable(e.to_string()))?;

        let shape: Vec<usize> = array.shape().iter().map(|&d| d as usize).collect();
        let (banded, bands, rows, cols) = match shape.as_slice() {
            [rows, cols] => (false, 1, *rows, *cols),
            [bands, rows, cols] => (true, *bands, *rows, *cols),
            other => return Err(unreadable(format!("unsupported array shape {:?}", other))),
        };
        if bands == 0 || rows == 0 || cols == 0 {
            return Err(unreadable(format!("empty array shape {:?}", shape)));
        }

        let pixel_type = pixel_type_of(array.data_type())
            .ok_or_else(|| unreadable(format!("unsupported data type {}", array.data_type())))?;

        let opened = Arc::new(OpenedArray {
            path_hash: hash_path(path),
            path: path.to_path_buf(),
            array,
            banded,
            bands,
            rows,
            cols,
            pixel_type,
        });

        debug!(
            path = %path.display(),
            bands, rows, cols,
            pixel_type = %pixel_type,
            "Opened source array"
        );

        self.arrays
            .write()
            .insert(path.to_path_buf(), Arc::clone(&opened));
        Ok(opened)
    }

    /// Decoded block (bx, by), all bands, band-major.
    fn block(&self, opened: &OpenedArray, bx: usize, by: usize) -> Result<Arc<Vec<f64>>> {
        let key = (opened.path_hash, bx, by);
        if let Some(data) = self.block_cache.lock().get(&key) {
            return Ok(data);
        }

        let data = Arc::new(read_block(opened, self.block_size, bx, by)?);
        trace!(bx, by, len = data.len(), "Decoded source block");
        self.block_cache.lock().insert(key, Arc::clone(&data));
        Ok(data)
    }

    /// Assemble the pixels covering `span` from cached blocks.
    fn patch(&self, opened: &OpenedArray, span: PixelSpan) -> Result<SourcePatch> {
        let bs = self.block_size;
        let mut data = RasterBuffer::filled(opened.bands, span.width(), span.height(), f64::NAN);

        for by in span.row0 / bs..=(span.row1 - 1) / bs {
            for bx in span.col0 / bs..=(span.col1 - 1) / bs {
                let block = self.block(opened, bx, by)?;
                let block_col0 = bx * bs;
                let block_row0 = by * bs;
                let block_w = (block_col0 + bs).min(opened.cols) - block_col0;
                let block_h = (block_row0 + bs).min(opened.rows) - block_row0;

                let col_lo = span.col0.max(block_col0);
                let col_hi = span.col1.min(block_col0 + block_w);
                let row_lo = span.row0.max(block_row0);
                let row_hi = span.row1.min(block_row0 + block_h);

                for band in 0..opened.bands {
                    let band_offset = band * block_w * block_h;
                    for row in row_lo..row_hi {
                        let src_row = band_offset + (row - block_row0) * block_w;
                        for col in col_lo..col_hi {
                            data.set(
                                band,
                                col - span.col0,
                                row - span.row0,
                                block[src_row + col - block_col0],
                            );
                        }
                    }
                }
            }
        }

        Ok(SourcePatch { span, data })
    }
}

impl RasterReader for ZarrRasterReader {
    fn open(&self, path: &Path) -> Result<SourceRaster> {
        let opened = self.open_array(path)?;
        let attrs = opened.array.attributes();
        let unreadable = |reason: String| MosaicError::unreadable(path.display().to_string(), reason);

        let bounds = attrs
            .get("bounds")
            .and_then(Bounds::from_json)
            .ok_or_else(|| unreadable("missing or malformed bounds attribute".to_string()))?;
        if !bounds.is_valid() {
            return Err(unreadable(format!("invalid bounds {}", bounds)));
        }

        let crs = attrs
            .get("crs")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let nodata = nodata_from_json(attrs.get("nodata")).map_err(unreadable)?;

        Ok(SourceRaster {
            path: path.to_path_buf(),
            bounds,
            resolution: Resolution::new(
                bounds.width() / opened.cols as f64,
                bounds.height() / opened.rows as f64,
            ),
            band_count: opened.bands,
            pixel_type: opened.pixel_type,
            nodata,
            crs,
        })
    }

    fn read_window(
        &self,
        source: &SourceRaster,
        window: &Bounds,
        out_width: usize,
        out_height: usize,
        fill_value: f64,
    ) -> Result<RasterBuffer> {
        let opened = self.open_array(&source.path)?;
        let span = match source_span(&source.transform(), opened.cols, opened.rows, window) {
            Some(span) => span,
            None => {
                return Ok(RasterBuffer::filled(
                    source.band_count,
                    out_width,
                    out_height,
                    fill_value,
                ))
            }
        };

        let patch = self.patch(&opened, span)?;
        Ok(resample_window(
            source,
            &patch,
            window,
            out_width,
            out_height,
            fill_value,
            self.resampling,
        ))
    }
}

/// Read one block of every band and widen it to `f64`.
fn read_block(opened: &OpenedArray, block_size: usize, bx: usize, by: usize) -> Result<Vec<f64>> {
    let unreadable = |reason: String| {
        MosaicError::unreadable(
            opened.path.display().to_string(),
            format!("block ({}, {}): {}", bx, by, reason),
        )
    };

    let col0 = bx * block_size;
    let row0 = by * block_size;
    let w = (col0 + block_size).min(opened.cols) - col0;
    let h = (row0 + block_size).min(opened.rows) - row0;

    let (start, shape) = if opened.banded {
        (
            vec![0, row0 as u64, col0 as u64],
            vec![opened.bands as u64, h as u64, w as u64],
        )
    } else {
        (vec![row0 as u64, col0 as u64], vec![h as u64, w as u64])
    };
    let subset = ArraySubset::new_with_start_shape(start, shape)
        .map_err(|e| unreadable(e.to_string()))?;

    macro_rules! widen {
        ($t:ty) => {
            opened
                .array
                .retrieve_array_subset_elements::<$t>(&subset)
                .map(|v| v.into_iter().map(|x| x as f64).collect())
        };
    }

    let data: std::result::Result<Vec<f64>, _> = match opened.pixel_type {
        PixelType::UInt8 => widen!(u8),
        PixelType::Int16 => widen!(i16),
        PixelType::UInt16 => widen!(u16),
        PixelType::Int32 => widen!(i32),
        PixelType::UInt32 => widen!(u32),
        PixelType::Float32 => widen!(f32),
        PixelType::Float64 => widen!(f64),
    };
    data.map_err(|e| unreadable(e.to_string()))
}
