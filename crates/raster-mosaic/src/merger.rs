//! Per-tile overlap resolution.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::aggregate::{cast_slice, reduce_band};
use crate::config::AggregationMethod;
use crate::error::{MosaicError, Result};
use crate::index::SpatialIndex;
use crate::io::RasterReader;
use crate::types::{OutputGrid, RasterBuffer, SourceRaster, Tile};

/// A candidate source dropped from one tile because its read failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub path: PathBuf,
    pub reason: String,
}

/// Output of [`TileMerger::merge_tile`].
#[derive(Debug, Clone)]
pub struct TileResult {
    pub tile: Tile,
    /// `grid.band_count` bands of `tile.width × tile.height` pixels.
    pub buffer: RasterBuffer,
    /// Number of sources whose bounds intersect the tile.
    pub candidates: usize,
    pub skipped: Vec<SkippedSource>,
}

impl TileResult {
    /// Sources that actually contributed a window.
    pub fn contributors(&self) -> usize {
        self.candidates - self.skipped.len()
    }
}

/// Everything a tile worker needs, shared read-only across workers.
pub struct TileMerger {
    reader: Arc<dyn RasterReader>,
    index: SpatialIndex,
    sources: Vec<SourceRaster>,
    grid: OutputGrid,
    method: AggregationMethod,
}

impl TileMerger {
    pub fn new(
        reader: Arc<dyn RasterReader>,
        sources: Vec<SourceRaster>,
        grid: OutputGrid,
        method: AggregationMethod,
    ) -> Self {
        let index = SpatialIndex::build(&sources);
        Self {
            reader,
            index,
            sources,
            grid,
            method,
        }
    }

    pub fn grid(&self) -> &OutputGrid {
        &self.grid
    }

    pub fn sources(&self) -> &[SourceRaster] {
        &self.sources
    }

    /// Compute one output tile.
    ///
    /// Candidates are read in ascending file id order. A candidate whose
    /// read fails with [`MosaicError::UnreadableSource`] is skipped; any
    /// other error aborts the tile.
    pub fn merge_tile(&self, tile: &Tile) -> Result<TileResult> {
        let grid = &self.grid;
        let bounds = grid.tile_bounds(tile);
        let ids = self.index.query(&bounds);

        let mut result = TileResult {
            tile: *tile,
            buffer: RasterBuffer::filled(grid.band_count, tile.width, tile.height, grid.nodata),
            candidates: ids.len(),
            skipped: Vec::new(),
        };

        if ids.is_empty() {
            trace!(tile_col = tile.col, tile_row = tile.row, "No candidates");
            return Ok(result);
        }

        let mut layers = Vec::with_capacity(ids.len());
        for id in ids {
            let source = &self.sources[id];
            match self
                .reader
                .read_window(source, &bounds, tile.width, tile.height, grid.nodata)
            {
                Ok(window) => layers.push(self.conform(source, window)?),
                Err(err) if err.is_recoverable_read() => {
                    warn!(
                        tile_col = tile.col,
                        tile_row = tile.row,
                        path = %source.path.display(),
                        error = %err,
                        "Skipping unreadable candidate"
                    );
                    result.skipped.push(SkippedSource {
                        path: source.path.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        if layers.is_empty() {
            return Ok(result);
        }

        for band in 0..grid.band_count {
            let stack: Vec<&[f64]> = layers.iter().map(|l| l.band(band)).collect();
            reduce_band(self.method, &stack, grid.nodata, result.buffer.band_mut(band));
        }
        cast_slice(grid.pixel_type, &mut result.buffer.data);

        Ok(result)
    }

    /// Bring a candidate window to the output band count.
    ///
    /// Missing bands are nodata; surplus bands are dropped.
    fn conform(&self, source: &SourceRaster, window: RasterBuffer) -> Result<RasterBuffer> {
        let grid = &self.grid;
        if window.band_len() == 0 || window.data.len() != window.bands * window.band_len() {
            return Err(MosaicError::Internal(format!(
                "{} returned a malformed window",
                source.path.display()
            )));
        }
        if window.bands == grid.band_count {
            return Ok(window);
        }

        warn!(
            path = %source.path.display(),
            source_bands = window.bands,
            output_bands = grid.band_count,
            "Band count differs from output"
        );
        let mut conformed =
            RasterBuffer::filled(grid.band_count, window.width, window.height, grid.nodata);
        for band in 0..grid.band_count.min(window.bands) {
            conformed.band_mut(band).copy_from_slice(window.band(band));
        }
        Ok(conformed)
    }
}
