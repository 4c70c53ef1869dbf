//! In-process raster backend.
//!
//! Holds source rasters and the output grid in memory. Used by tests and
//! dry runs, and as the reference behaviour for other backends.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::resample::{resample_window, source_span, SourcePatch};
use super::{OutputDriver, RasterReader, RasterWriter, WriteStats};
use crate::config::{MergeJob, ResampleMethod};
use crate::error::{MosaicError, Result};
use crate::types::{Bounds, OutputGrid, RasterBuffer, SourceRaster, Tile};

/// Reader over rasters registered in memory.
#[derive(Default)]
pub struct MemoryRasterReader {
    rasters: RwLock<HashMap<PathBuf, (SourceRaster, Arc<RasterBuffer>)>>,
    failing_reads: RwLock<HashSet<PathBuf>>,
    resampling: ResampleMethod,
}

impl MemoryRasterReader {
    pub fn new(resampling: ResampleMethod) -> Self {
        Self {
            resampling,
            ..Default::default()
        }
    }

    /// Register a raster. The buffer shape must match the metadata.
    pub fn insert(&self, meta: SourceRaster, data: RasterBuffer) -> Result<()> {
        let (w, h) = meta.shape();
        if data.width != w || data.height != h || data.bands != meta.band_count {
            return Err(MosaicError::configuration(format!(
                "{}: buffer is {}x{}x{}, metadata implies {}x{}x{}",
                meta.path.display(),
                data.bands,
                data.width,
                data.height,
                meta.band_count,
                w,
                h
            )));
        }
        self.rasters
            .write()
            .insert(meta.path.clone(), (meta, Arc::new(data)));
        Ok(())
    }

    /// Make every subsequent window read of `path` fail, as a corrupt file would.
    pub fn fail_reads_for(&self, path: impl Into<PathBuf>) {
        self.failing_reads.write().insert(path.into());
    }
}

impl RasterReader for MemoryRasterReader {
    fn open(&self, path: &Path) -> Result<SourceRaster> {
        self.rasters
            .read()
            .get(path)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| MosaicError::unreadable(path.display().to_string(), "no such raster"))
    }

    fn read_window(
        &self,
        source: &SourceRaster,
        window: &Bounds,
        out_width: usize,
        out_height: usize,
        fill_value: f64,
    ) -> Result<RasterBuffer> {
        if self.failing_reads.read().contains(&source.path) {
            return Err(MosaicError::unreadable(
                source.path.display().to_string(),
                "injected read failure",
            ));
        }

        let data = self
            .rasters
            .read()
            .get(&source.path)
            .map(|(_, data)| Arc::clone(data))
            .ok_or_else(|| {
                MosaicError::unreadable(source.path.display().to_string(), "no such raster")
            })?;

        let Some(span) = source_span(&source.transform(), data.width, data.height, window) else {
            return Ok(RasterBuffer::filled(
                source.band_count,
                out_width,
                out_height,
                fill_value,
            ));
        };
        let patch = SourcePatch::crop(&data, span);

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

/// Output state shared between a [`MemoryRasterWriter`] and its observers.
#[derive(Debug, Clone)]
pub struct MemoryOutput {
    /// Persisted pixels of the whole grid.
    pub raster: RasterBuffer,
    /// Tiles persisted so far, in write order.
    pub persisted: Vec<Tile>,
    /// Tiles accepted but not yet checkpointed.
    pub pending: Vec<(Tile, RasterBuffer)>,
    pub checkpoints: usize,
    pub finished: bool,
}

impl MemoryOutput {
    fn persist_pending(&mut self) {
        for (tile, buf) in self.pending.drain(..) {
            for band in 0..buf.bands.min(self.raster.bands) {
                for r in 0..tile.height {
                    for c in 0..tile.width {
                        if let Some(v) = buf.get(band, c, r) {
                            self.raster.set(band, tile.col + c, tile.row + r, v);
                        }
                    }
                }
            }
            self.persisted.push(tile);
        }
    }
}

/// Driver creating in-memory outputs; the last created output stays inspectable.
#[derive(Default, Clone)]
pub struct MemoryOutputDriver {
    output: Arc<Mutex<Option<MemoryOutput>>>,
}

impl MemoryOutputDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the most recently created output.
    pub fn output(&self) -> Option<MemoryOutput> {
        self.output.lock().clone()
    }
}

impl OutputDriver for MemoryOutputDriver {
    type Writer = MemoryRasterWriter;

    fn create(&self, _path: &Path, grid: &OutputGrid, _job: &MergeJob) -> Result<Self::Writer> {
        *self.output.lock() = Some(MemoryOutput {
            raster: RasterBuffer::filled(grid.band_count, grid.width, grid.height, grid.nodata),
            persisted: Vec::new(),
            pending: Vec::new(),
            checkpoints: 0,
            finished: false,
        });
        Ok(MemoryRasterWriter {
            output: Arc::clone(&self.output),
            grid_size: (grid.width, grid.height),
            stats: WriteStats::default(),
        })
    }
}

/// Writer half of [`MemoryOutputDriver`].
pub struct MemoryRasterWriter {
    output: Arc<Mutex<Option<MemoryOutput>>>,
    grid_size: (usize, usize),
    stats: WriteStats,
}

impl MemoryRasterWriter {
    fn with_output<T>(&self, f: impl FnOnce(&mut MemoryOutput) -> T) -> Result<T> {
        let mut guard = self.output.lock();
        let output = guard
            .as_mut()
            .ok_or_else(|| MosaicError::write_failure("output was released"))?;
        if output.finished {
            return Err(MosaicError::write_failure("output already finished"));
        }
        Ok(f(output))
    }
}

impl RasterWriter for MemoryRasterWriter {
    fn write_tile(&mut self, tile: &Tile, buffer: &RasterBuffer) -> Result<()> {
        let (w, h) = self.grid_size;
        if tile.col + tile.width > w || tile.row + tile.height > h {
            return Err(MosaicError::write_failure(format!(
                "{} exceeds the {}x{} output",
                tile, w, h
            )));
        }
        if buffer.width != tile.width || buffer.height != tile.height {
            return Err(MosaicError::write_failure(format!(
                "buffer {}x{} does not match {}",
                buffer.width, buffer.height, tile
            )));
        }
        self.with_output(|out| out.pending.push((*tile, buffer.clone())))?;
        self.stats.tiles_written += 1;
        self.stats.bytes_written += buffer.memory_bytes() as u64;
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.with_output(|out| {
            out.persist_pending();
            out.checkpoints += 1;
        })?;
        self.stats.checkpoints += 1;
        Ok(())
    }

    fn finish(self) -> Result<WriteStats> {
        self.with_output(|out| {
            out.persist_pending();
            out.finished = true;
        })?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, PixelType, Resolution};

    fn meta(path: &str, bounds: Bounds) -> SourceRaster {
        SourceRaster {
            path: PathBuf::from(path),
            bounds,
            resolution: Resolution::new(1.0, 1.0),
            band_count: 1,
            pixel_type: PixelType::Float32,
            nodata: Some(-1.0),
            crs: None,
        }
    }

    fn grid(width: usize, height: usize) -> OutputGrid {
        let resolution = Resolution::new(1.0, 1.0);
        OutputGrid {
            bounds: Bounds::new(0.0, 0.0, width as f64, height as f64),
            resolution,
            width,
            height,
            transform: GeoTransform::from_origin(0.0, height as f64, resolution),
            band_count: 1,
            pixel_type: PixelType::Float32,
            nodata: -1.0,
            crs: None,
        }
    }

    #[test]
    fn test_reader_open_and_read() {
        let reader = MemoryRasterReader::default();
        let m = meta("a", Bounds::new(0.0, 0.0, 2.0, 2.0));
        reader
            .insert(m.clone(), RasterBuffer::from_vec(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap())
            .unwrap();

        assert_eq!(reader.open(Path::new("a")).unwrap(), m);
        assert!(reader.open(Path::new("missing")).is_err());

        let buf = reader
            .read_window(&m, &Bounds::new(1.0, 0.0, 3.0, 1.0), 2, 1, -1.0)
            .unwrap();
        assert_eq!(buf.data, vec![4.0, -1.0]);
    }

    #[test]
    fn test_reader_rejects_mismatched_buffer() {
        let reader = MemoryRasterReader::default();
        let m = meta("a", Bounds::new(0.0, 0.0, 2.0, 2.0));
        assert!(reader.insert(m, RasterBuffer::filled(1, 3, 2, 0.0)).is_err());
    }

    #[test]
    fn test_injected_read_failure() {
        let reader = MemoryRasterReader::default();
        let m = meta("bad", Bounds::new(0.0, 0.0, 1.0, 1.0));
        reader.insert(m.clone(), RasterBuffer::filled(1, 1, 1, 0.0)).unwrap();
        reader.fail_reads_for("bad");

        assert!(reader.open(Path::new("bad")).is_ok());
        let err = reader
            .read_window(&m, &m.bounds, 1, 1, -1.0)
            .unwrap_err();
        assert!(err.is_recoverable_read());
    }

    #[test]
    fn test_writer_persists_on_checkpoint_and_finish() {
        let driver = MemoryOutputDriver::new();
        let mut writer = driver
            .create(Path::new("out"), &grid(4, 2), &MergeJob::default())
            .unwrap();

        writer
            .write_tile(&Tile::new(0, 0, 2, 2), &RasterBuffer::filled(1, 2, 2, 7.0))
            .unwrap();
        let out = driver.output().unwrap();
        assert_eq!(out.pending.len(), 1);
        assert!(out.persisted.is_empty());

        writer.checkpoint().unwrap();
        writer
            .write_tile(&Tile::new(2, 0, 2, 2), &RasterBuffer::filled(1, 2, 2, 9.0))
            .unwrap();
        let stats = writer.finish().unwrap();

        assert_eq!(stats.tiles_written, 2);
        assert_eq!(stats.checkpoints, 1);

        let out = driver.output().unwrap();
        assert!(out.finished);
        assert_eq!(out.persisted.len(), 2);
        assert_eq!(out.raster.data, vec![7.0, 7.0, 9.0, 9.0, 7.0, 7.0, 9.0, 9.0]);
    }

    #[test]
    fn test_writer_rejects_out_of_grid_tile() {
        let driver = MemoryOutputDriver::new();
        let mut writer = driver
            .create(Path::new("out"), &grid(4, 2), &MergeJob::default())
            .unwrap();
        let err = writer
            .write_tile(&Tile::new(3, 0, 2, 2), &RasterBuffer::filled(1, 2, 2, 0.0))
            .unwrap_err();
        assert!(matches!(err, MosaicError::WriteFailure(_)));
    }
}
