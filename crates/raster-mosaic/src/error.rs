//! Error types for raster mosaicking.

use thiserror::Error;

use crate::types::{Bounds, Tile};

/// Errors that can occur while planning or running a merge.
///
/// Cancellation is not an error; see [`crate::MergeOutcome::Cancelled`].
#[derive(Error, Debug)]
pub enum MosaicError {
    /// Invalid job configuration or input set; the job never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input raster could not be opened or read.
    #[error("unreadable source {path}: {reason}")]
    UnreadableSource { path: String, reason: String },

    /// The output raster could not be created, written or flushed.
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// A tile computation failed for a reason other than a skipped candidate.
    #[error("{tile} covering {bounds} failed: {source}")]
    TileFailed {
        tile: Tile,
        bounds: Bounds,
        #[source]
        source: Box<MosaicError>,
    },

    /// A worker task panicked or was torn down unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MosaicError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an UnreadableSource error.
    pub fn unreadable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a WriteFailure error.
    pub fn write_failure(msg: impl Into<String>) -> Self {
        Self::WriteFailure(msg.into())
    }

    /// Wrap an error with the tile that triggered it.
    pub fn in_tile(self, tile: Tile, bounds: Bounds) -> Self {
        Self::TileFailed {
            tile,
            bounds,
            source: Box::new(self),
        }
    }

    /// Whether a tile merger may skip the offending candidate and carry on.
    pub fn is_recoverable_read(&self) -> bool {
        matches!(self, Self::UnreadableSource { .. })
    }
}

impl From<std::io::Error> for MosaicError {
    fn from(err: std::io::Error) -> Self {
        Self::WriteFailure(err.to_string())
    }
}

impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Result type for mosaic operations.
pub type Result<T> = std::result::Result<T, MosaicError>;
