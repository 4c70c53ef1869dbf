//! Division of the output grid into tiles.

use crate::types::{OutputGrid, Tile};

/// Row-major tiling of a `width × height` pixel grid.
///
/// The partition is a value: iterating it does not consume it, so the
/// same sequence can be replayed. Boundary tiles are truncated, never padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePartition {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
}

impl TilePartition {
    /// Tile a `width × height` grid. `block_size` must be positive; it is
    /// clamped per axis to the grid dimension.
    pub fn new(width: usize, height: usize, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            width,
            height,
            block_width: block_size.min(width.max(1)),
            block_height: block_size.min(height.max(1)),
        }
    }

    /// Tiles per row.
    pub fn tiles_x(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    /// Tiles per column.
    pub fn tiles_y(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Total number of tiles.
    pub fn len(&self) -> usize {
        self.tiles_x() * self.tiles_y()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tile at a row-major position.
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }
        let tx = index % self.tiles_x();
        let ty = index / self.tiles_x();
        let col = tx * self.block_width;
        let row = ty * self.block_height;
        Some(Tile::new(
            col,
            row,
            self.block_width.min(self.width - col),
            self.block_height.min(self.height - row),
        ))
    }

    /// A fresh iterator from the top-left tile.
    pub fn iter(&self) -> Tiles {
        Tiles {
            partition: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &TilePartition {
    type Item = Tile;
    type IntoIter = Tiles;

    fn into_iter(self) -> Tiles {
        self.iter()
    }
}

/// Lazy iterator over a [`TilePartition`].
#[derive(Debug, Clone)]
pub struct Tiles {
    partition: TilePartition,
    next: usize,
}

impl Iterator for Tiles {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        let tile = self.partition.tile(self.next)?;
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.partition.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Tiles {}

/// Partition an output grid into tiles of at most `block_size` pixels per edge.
pub fn partition(grid: &OutputGrid, block_size: usize) -> TilePartition {
    TilePartition::new(grid.width, grid.height, block_size)
}
