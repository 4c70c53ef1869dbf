//! Raster I/O collaborators.
//!
//! The merge engine never decodes a file format itself. It talks to
//! sources through [`RasterReader`] and to the output through
//! [`OutputDriver`] / [`RasterWriter`]:
//!
//! ```text
//! MergeScheduler
//!      │
//!      ├─► RasterReader::open(path)            (planning, once per input)
//!      │
//!      ├─► RasterReader::read_window(..)       (tile workers, concurrent)
//!      │
//!      └─► OutputDriver::create(..)
//!               │
//!               └─► RasterWriter::write_tile / checkpoint / finish
//!                        (single writer, serialized)
//! ```
//!
//! Two backends are provided: [`memory`] keeps everything in process and
//! [`zarr`] reads and writes Zarr V3 arrays on the local filesystem.

pub mod memory;
mod resample;
pub mod zarr;

use std::path::Path;

use crate::config::MergeJob;
use crate::error::Result;
use crate::types::{Bounds, OutputGrid, RasterBuffer, SourceRaster, Tile};

pub use memory::{MemoryOutput, MemoryOutputDriver, MemoryRasterReader, MemoryRasterWriter};
pub use resample::{resample_window, source_span, PixelSpan, SourcePatch};
pub use zarr::{ZarrCodecOptions, ZarrCompression, ZarrOutputDriver, ZarrRasterReader, ZarrRasterWriter};

/// Read access to source rasters.
///
/// Implementations must be safe to call from many tile workers at once.
pub trait RasterReader: Send + Sync {
    /// Read a source's georeferenced metadata.
    ///
    /// Fails with [`crate::MosaicError::UnreadableSource`] if the file
    /// cannot be opened.
    fn open(&self, path: &Path) -> Result<SourceRaster>;

    /// Read the geographic `window` of `source` resampled to
    /// `out_width × out_height` pixels.
    ///
    /// Boundless: pixels outside the source extent, and pixels equal to the
    /// source's own nodata value, are set to `fill_value`. The returned
    /// buffer has `source.band_count` bands.
    fn read_window(
        &self,
        source: &SourceRaster,
        window: &Bounds,
        out_width: usize,
        out_height: usize,
        fill_value: f64,
    ) -> Result<RasterBuffer>;
}

/// Creates output rasters.
pub trait OutputDriver: Send + Sync {
    type Writer: RasterWriter;

    /// Create the output raster for `grid`, passing `job.creation_options`
    /// through to the format.
    fn create(&self, path: &Path, grid: &OutputGrid, job: &MergeJob) -> Result<Self::Writer>;
}

/// Exclusive handle on one output raster.
///
/// Calls are serialized by the scheduler; `checkpoint` is only invoked
/// between writes.
pub trait RasterWriter: Send {
    /// Accept a tile buffer at the tile's pixel offset.
    fn write_tile(&mut self, tile: &Tile, buffer: &RasterBuffer) -> Result<()>;

    /// Force buffered writes to persistent storage.
    fn checkpoint(&mut self) -> Result<()>;

    /// Persist anything still buffered and release the output.
    fn finish(self) -> Result<WriteStats>;
}

/// Counters reported by a writer when it is finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub tiles_written: usize,
    pub checkpoints: usize,
    pub bytes_written: u64,
}
