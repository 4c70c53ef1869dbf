//! High-level mosaic service.
//!
//! `MosaicService` wires the Zarr reader and output driver to a
//! [`MergeScheduler`] so callers only deal with paths and a job.
//!
//! # Example
//!
//! ```rust,ignore
//! use raster_mosaic::{MergeJob, MosaicService};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = MosaicService::new(MergeJob::from_env()?)?;
//! let outcome = service
//!     .merge(&inputs, Path::new("mosaic.zarr"), CancellationToken::new())
//!     .await?;
//! println!("{} tiles", outcome.summary().tiles_written);
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::CacheStats;
use crate::config::MergeJob;
use crate::error::Result;
use crate::io::{ZarrOutputDriver, ZarrRasterReader};
use crate::scheduler::{MergeObserver, MergeOutcome, MergeScheduler, TracingObserver};

/// Merges Zarr rasters on the local filesystem.
///
/// The reader and its block cache live as long as the service, but each
/// merge starts from an empty cache so inputs rewritten between merges are
/// read afresh.
pub struct MosaicService {
    job: MergeJob,
    reader: Arc<ZarrRasterReader>,
    driver: ZarrOutputDriver,
    observer: Arc<dyn MergeObserver>,
}

impl MosaicService {
    /// Create a service for `job`. The block cache is sized from
    /// `job.cache_size_mb`.
    pub fn new(job: MergeJob) -> Result<Self> {
        job.validate()?;
        let reader = Arc::new(ZarrRasterReader::new(
            job.cache_size_bytes(),
            job.resampling,
        ));
        Ok(Self {
            job,
            reader,
            driver: ZarrOutputDriver::new(),
            observer: Arc::new(TracingObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_driver(mut self, driver: ZarrOutputDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn job(&self) -> &MergeJob {
        &self.job
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.reader.cache_stats()
    }

    /// Merge `inputs` into the Zarr array at `output`.
    pub async fn merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<MergeOutcome> {
        self.reader.reset();

        let mut scheduler = MergeScheduler::new(
            self.reader.clone(),
            self.driver.clone(),
            self.job.clone(),
        )?
        .with_observer(Arc::clone(&self.observer))
        .with_cancellation(cancel);

        scheduler.run(inputs, output).await
    }
}
