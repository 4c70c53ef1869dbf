//! Zarr V3 output writer.
//!
//! Tiles handed to [`ZarrRasterWriter::write_tile`] are buffered and
//! stored as array subsets on `checkpoint`, on `finish`, or whenever the
//! buffer outgrows its byte budget.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use zarrs::array::{Array, ArrayBuilder, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

use super::{data_type_of, nodata_to_json, ZarrCodecOptions};
use crate::config::MergeJob;
use crate::error::{MosaicError, Result};
use crate::io::{OutputDriver, RasterWriter, WriteStats};
use crate::types::{OutputGrid, PixelType, RasterBuffer, Tile};

/// Default ceiling on buffered, not yet stored tile data.
pub const DEFAULT_PENDING_BYTES: usize = 256 * 1024 * 1024;

/// Creates Zarr outputs on the local filesystem.
#[derive(Debug, Clone)]
pub struct ZarrOutputDriver {
    max_pending_bytes: usize,
}

impl Default for ZarrOutputDriver {
    fn default() -> Self {
        Self {
            max_pending_bytes: DEFAULT_PENDING_BYTES,
        }
    }
}

impl ZarrOutputDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store buffered tiles early once they exceed `bytes`.
    pub fn with_max_pending_bytes(mut self, bytes: usize) -> Self {
        self.max_pending_bytes = bytes;
        self
    }
}

impl OutputDriver for ZarrOutputDriver {
    type Writer = ZarrRasterWriter;

    fn create(&self, path: &Path, grid: &OutputGrid, job: &MergeJob) -> Result<Self::Writer> {
        let codec_options = ZarrCodecOptions::from_creation_options(&job.creation_options)?;
        prepare_output_dir(path)?;

        let store = FilesystemStore::new(path).map_err(|e| MosaicError::write_failure(e.to_string()))?;
        let array = build_array(Arc::new(store), grid, job, &codec_options)?;
        array
            .store_metadata()
            .map_err(|e| MosaicError::write_failure(e.to_string()))?;

        info!(
            path = %path.display(),
            width = grid.width,
            height = grid.height,
            bands = grid.band_count,
            pixel_type = %grid.pixel_type,
            compression = %codec_options.compression,
            "Created output array"
        );

        Ok(ZarrRasterWriter {
            array,
            pixel_type: grid.pixel_type,
            grid_size: (grid.width, grid.height),
            band_count: grid.band_count,
            pending: Vec::new(),
            pending_bytes: 0,
            max_pending_bytes: self.max_pending_bytes,
            stats: WriteStats::default(),
        })
    }
}

/// Refuse to clobber anything that is not a previous Zarr output.
fn prepare_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        if path.join("zarr.json").is_file() {
            debug!(path = %path.display(), "Replacing existing output array");
            std::fs::remove_dir_all(path)?;
        } else if !path.is_dir() || std::fs::read_dir(path)?.next().is_some() {
            return Err(MosaicError::write_failure(format!(
                "{} exists and is not a Zarr array",
                path.display()
            )));
        }
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

fn build_array(
    store: Arc<FilesystemStore>,
    grid: &OutputGrid,
    job: &MergeJob,
    codec_options: &ZarrCodecOptions,
) -> Result<Array<FilesystemStore>> {
    let mut attrs = serde_json::Map::new();
    attrs.insert("bounds".to_string(), grid.bounds.to_json());
    attrs.insert(
        "resolution".to_string(),
        serde_json::json!([grid.resolution.x, grid.resolution.y]),
    );
    attrs.insert(
        "transform".to_string(),
        serde_json::json!(grid.transform.to_gdal()),
    );
    attrs.insert("crs".to_string(), serde_json::json!(grid.crs));
    attrs.insert("nodata".to_string(), nodata_to_json(Some(grid.nodata)));
    attrs.insert("method".to_string(), serde_json::json!(job.method.as_str()));
    attrs.insert(
        "creation_options".to_string(),
        serde_json::json!(job.creation_options.as_slice()),
    );

    let block = job.block_size.max(1) as u64;
    let chunk_grid: zarrs::array::ChunkGrid = vec![
        grid.band_count as u64,
        block.min(grid.height as u64).max(1),
        block.min(grid.width as u64).max(1),
    ]
    .try_into()
    .map_err(|e| MosaicError::configuration(format!("{:?}", e)))?;

    let mut builder = ArrayBuilder::new(
        vec![
            grid.band_count as u64,
            grid.height as u64,
            grid.width as u64,
        ],
        data_type_of(grid.pixel_type),
        chunk_grid,
        fill_value(grid.pixel_type, grid.nodata),
    );
    builder.attributes(attrs);

    if let Some(codec) = codec_options.codec(grid.pixel_type)? {
        builder.bytes_to_bytes_codecs(vec![codec]);
    }

    builder
        .build(store, "/")
        .map_err(|e| MosaicError::write_failure(e.to_string()))
}

/// Fill value in the array's own element type. `nodata` is already cast.
fn fill_value(pixel_type: PixelType, nodata: f64) -> FillValue {
    match pixel_type {
        PixelType::UInt8 => FillValue::from(nodata as u8),
        PixelType::Int16 => FillValue::from(nodata as i16),
        PixelType::UInt16 => FillValue::from(nodata as u16),
        PixelType::Int32 => FillValue::from(nodata as i32),
        PixelType::UInt32 => FillValue::from(nodata as u32),
        PixelType::Float32 => FillValue::from(nodata as f32),
        PixelType::Float64 => FillValue::from(nodata),
    }
}

/// Exclusive writer for one Zarr output array.
pub struct ZarrRasterWriter {
    array: Array<FilesystemStore>,
    pixel_type: PixelType,
    grid_size: (usize, usize),
    band_count: usize,
    pending: Vec<(Tile, RasterBuffer)>,
    pending_bytes: usize,
    max_pending_bytes: usize,
    stats: WriteStats,
}

impl ZarrRasterWriter {
    fn store_pending(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;

        for (tile, buffer) in &pending {
            self.store_tile(tile, buffer)?;
        }
        if !pending.is_empty() {
            debug!(tiles = pending.len(), "Stored pending tiles");
        }
        Ok(())
    }

    fn store_tile(&mut self, tile: &Tile, buffer: &RasterBuffer) -> Result<()> {
        let subset = ArraySubset::new_with_start_shape(
            vec![0, tile.row as u64, tile.col as u64],
            vec![
                self.band_count as u64,
                tile.height as u64,
                tile.width as u64,
            ],
        )
        .map_err(|e| MosaicError::write_failure(e.to_string()))?;

        macro_rules! store_as {
            ($t:ty) => {{
                let typed: Vec<$t> = buffer.data.iter().map(|&v| v as $t).collect();
                self.array.store_array_subset_elements::<$t>(&subset, &typed)
            }};
        }

        match self.pixel_type {
            PixelType::UInt8 => store_as!(u8),
            PixelType::Int16 => store_as!(i16),
            PixelType::UInt16 => store_as!(u16),
            PixelType::Int32 => store_as!(i32),
            PixelType::UInt32 => store_as!(u32),
            PixelType::Float32 => store_as!(f32),
            PixelType::Float64 => store_as!(f64),
        }
        .map_err(|e| MosaicError::write_failure(format!("{}: {}", tile, e)))?;

        self.stats.bytes_written += (buffer.data.len() * self.pixel_type.size_bytes()) as u64;
        Ok(())
    }
}

impl RasterWriter for ZarrRasterWriter {
    fn write_tile(&mut self, tile: &Tile, buffer: &RasterBuffer) -> Result<()> {
        let (w, h) = self.grid_size;
        if tile.col + tile.width > w || tile.row + tile.height > h {
            return Err(MosaicError::write_failure(format!(
                "{} exceeds the {}x{} output",
                tile, w, h
            )));
        }
        if buffer.bands != self.band_count
            || buffer.width != tile.width
            || buffer.height != tile.height
        {
            return Err(MosaicError::write_failure(format!(
                "buffer {}x{}x{} does not match {}",
                buffer.bands, buffer.width, buffer.height, tile
            )));
        }

        self.pending_bytes += buffer.memory_bytes();
        self.pending.push((*tile, buffer.clone()));
        self.stats.tiles_written += 1;

        if self.pending_bytes > self.max_pending_bytes {
            self.store_pending()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.store_pending()?;
        self.stats.checkpoints += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<WriteStats> {
        self.store_pending()?;
        Ok(self.stats)
    }
}
