//! Block-wise mosaicking of overlapping georeferenced rasters.
//!
//! Many partially overlapping source rasters are merged into one output
//! raster. Where sources overlap, each pixel is resolved by a configurable
//! [`AggregationMethod`] over the values that are not nodata. Work is split
//! into disjoint output tiles so peak memory stays bounded by
//! `worker_count` tile buffers, whatever the raster size.
//!
//! # Architecture
//!
//! ```text
//! input paths
//!      │
//!      ▼
//! RasterReader::open ──► grid::plan ──► TilePartition
//!                                            │ row-major
//!                                            ▼
//!                    ┌──────── MergeScheduler (worker pool) ────────┐
//!                    │  TileMerger::merge_tile(tile)                │
//!                    │     ├─► SpatialIndex::query(tile bounds)     │
//!                    │     ├─► RasterReader::read_window per match  │
//!                    │     └─► aggregate::reduce_band per band      │
//!                    └──────────────────┬───────────────────────────┘
//!                                       │ completion order
//!                                       ▼
//!                         RasterWriter::write_tile (single writer)
//!                           └─► checkpoint every flush_interval
//! ```
//!
//! # Example
//!
//! ```ignore
//! use raster_mosaic::{AggregationMethod, MergeJob, MosaicService};
//! use tokio_util::sync::CancellationToken;
//!
//! let job = MergeJob {
//!     method: AggregationMethod::Max,
//!     ..Default::default()
//! };
//! let service = MosaicService::new(job)?;
//! let outcome = service
//!     .merge(&inputs, Path::new("dem.zarr"), CancellationToken::new())
//!     .await?;
//! ```

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod grid;
pub mod index;
pub mod io;
pub mod merger;
pub mod partition;
pub mod scheduler;
pub mod service;
pub mod testdata;
pub mod types;

// Re-export commonly used types at crate root
pub use cache::{BlockCache, CacheStats};
pub use config::{AggregationMethod, CreationOptions, MergeJob, ResampleMethod};
pub use error::{MosaicError, Result};
pub use grid::plan;
pub use index::SpatialIndex;
pub use io::{
    MemoryOutputDriver, MemoryRasterReader, OutputDriver, RasterReader, RasterWriter,
    WriteStats, ZarrOutputDriver, ZarrRasterReader,
};
pub use merger::{SkippedSource, TileMerger, TileResult};
pub use partition::{partition, TilePartition};
pub use scheduler::{
    MergeObserver, MergeOutcome, MergeScheduler, MergeState, MergeSummary, TracingObserver,
};
pub use service::MosaicService;
pub use types::{
    Bounds, GeoTransform, OutputGrid, PixelType, RasterBuffer, Resolution, SourceRaster, Tile,
};
