//! Merge scheduler: planning, the tile worker pool and the single writer.
//!
//! ```text
//!              Idle
//!               │ run()
//!               ▼
//!            Planning ──────────────┐ open / plan / create fails
//!               │                   │
//!               ▼                   ▼
//!            Running ───────────► Failed
//!            │     │   fatal tile error, write or checkpoint failure
//!  all tiles │     │ token cancelled
//!   written  ▼     ▼
//!    Completed   Cancelled
//! ```
//!
//! Tile merges run on blocking threads, at most `worker_count` at a time.
//! Results are written one at a time by the task driving [`MergeScheduler::run`],
//! in completion order.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MergeJob;
use crate::error::{MosaicError, Result};
use crate::grid;
use crate::io::{OutputDriver, RasterReader, RasterWriter};
use crate::merger::{TileMerger, TileResult};
use crate::partition::TilePartition;
use crate::types::{OutputGrid, SourceRaster, Tile};

/// Receives the scheduler's log, error and progress events.
///
/// Implementations must be `Send + Sync`; events are emitted from the task
/// driving the merge.
pub trait MergeObserver: Send + Sync {
    /// Informational message (checkpoints, terminal state).
    fn log(&self, _message: &str) {}

    /// Recoverable or fatal error description.
    fn error(&self, _message: &str) {}

    /// Percentage of tiles written, `0..=100`, non-decreasing.
    fn progress(&self, _percent: u8) {}
}

/// Observer that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl MergeObserver for TracingObserver {
    fn log(&self, message: &str) {
        info!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }

    fn progress(&self, percent: u8) {
        debug!(percent, "Progress");
    }
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    Planning,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl MergeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters describing a finished or interrupted merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub grid: OutputGrid,
    pub tiles_total: usize,
    pub tiles_written: usize,
    pub checkpoints: usize,
    /// Candidate reads skipped across all tiles.
    pub skipped_reads: usize,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Non-error terminal outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Completed(MergeSummary),
    /// Stopped early on request; tiles written so far stay in the output.
    Cancelled(MergeSummary),
}

impl MergeOutcome {
    pub fn summary(&self) -> &MergeSummary {
        match self {
            Self::Completed(s) | Self::Cancelled(s) => s,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result of the planning phase.
struct Plan {
    sources: Vec<SourceRaster>,
    grid: OutputGrid,
    partition: TilePartition,
}

/// Drives one merge job from an input list to a written output.
pub struct MergeScheduler<D: OutputDriver> {
    reader: Arc<dyn RasterReader>,
    driver: D,
    job: MergeJob,
    observer: Arc<dyn MergeObserver>,
    cancel: CancellationToken,
    state: MergeState,
}

impl<D: OutputDriver> MergeScheduler<D> {
    /// Create a scheduler. Fails if the job configuration is invalid.
    pub fn new(reader: Arc<dyn RasterReader>, driver: D, job: MergeJob) -> Result<Self> {
        job.validate()?;
        Ok(Self {
            reader,
            driver,
            job,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
            state: MergeState::Idle,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this scheduler's merge when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn job(&self) -> &MergeJob {
        &self.job
    }

    fn transition(&mut self, next: MergeState) {
        debug!(from = %self.state, to = %next, "Merge state transition");
        self.state = next;
    }

    /// Merge `inputs` into `output`.
    ///
    /// Input order defines file ids and therefore the `first`/`last`
    /// precedence. Returns `Ok(Cancelled)` if the token fires before the
    /// last tile is written.
    pub async fn run(&mut self, inputs: &[PathBuf], output: &Path) -> Result<MergeOutcome> {
        if self.state != MergeState::Idle {
            return Err(MosaicError::Internal(format!(
                "scheduler is {}, not idle",
                self.state
            )));
        }
        let started = Instant::now();

        self.transition(MergeState::Planning);
        let plan = match self.plan(inputs).await {
            Ok(plan) => plan,
            Err(err) => return Err(self.fail(err)),
        };

        let writer = match self.driver.create(output, &plan.grid, &self.job) {
            Ok(writer) => writer,
            Err(err) => return Err(self.fail(err)),
        };

        info!(
            inputs = inputs.len(),
            output = %output.display(),
            width = plan.grid.width,
            height = plan.grid.height,
            tiles = plan.partition.len(),
            method = %self.job.method,
            workers = self.job.worker_count,
            "Starting merge"
        );

        self.transition(MergeState::Running);
        self.execute(plan, writer, started).await
    }

    /// Open every input and derive the grid and partition off the runtime.
    async fn plan(&self, inputs: &[PathBuf]) -> Result<Plan> {
        if inputs.is_empty() {
            return Err(MosaicError::configuration("no input rasters"));
        }

        let reader = Arc::clone(&self.reader);
        let inputs = inputs.to_vec();
        let job = self.job.clone();

        tokio::task::spawn_blocking(move || {
            let sources = inputs
                .iter()
                .map(|path| reader.open(path))
                .collect::<Result<Vec<_>>>()?;
            let grid = grid::plan(&sources, &job)?;
            let partition = TilePartition::new(grid.width, grid.height, job.block_size);
            Ok(Plan {
                sources,
                grid,
                partition,
            })
        })
        .await
        .map_err(|e| MosaicError::Internal(format!("planning task failed: {}", e)))?
    }

    async fn execute(
        &mut self,
        plan: Plan,
        mut writer: D::Writer,
        started: Instant,
    ) -> Result<MergeOutcome> {
        let Plan {
            sources,
            grid,
            partition,
        } = plan;
        let merger = Arc::new(TileMerger::new(
            Arc::clone(&self.reader),
            sources,
            grid.clone(),
            self.job.method,
        ));

        let total = partition.len();
        let mut tiles = partition.iter();
        let mut in_flight: JoinSet<(Tile, Result<TileResult>)> = JoinSet::new();
        let mut summary = MergeSummary {
            grid,
            tiles_total: total,
            tiles_written: 0,
            checkpoints: 0,
            skipped_reads: 0,
            bytes_written: 0,
            elapsed: Duration::ZERO,
        };

        loop {
            // Keep the pool full.
            while in_flight.len() < self.job.worker_count && !self.cancel.is_cancelled() {
                let Some(tile) = tiles.next() else { break };
                let merger = Arc::clone(&merger);
                in_flight.spawn_blocking(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| merger.merge_tile(&tile)))
                        .unwrap_or_else(|_| {
                            Err(MosaicError::Internal("tile worker panicked".to_string()))
                        });
                    (tile, result)
                });
            }

            if self.cancel.is_cancelled() {
                return self.cancelled(in_flight, writer, summary, started).await;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            if self.cancel.is_cancelled() {
                return self.cancelled(in_flight, writer, summary, started).await;
            }

            let (tile, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    let err = MosaicError::Internal(format!("tile task failed: {}", e));
                    return Err(self.abort(in_flight, writer, err).await);
                }
            };

            let tile_result = match result {
                Ok(r) => r,
                Err(err) => {
                    let err = err.in_tile(tile, summary.grid.tile_bounds(&tile));
                    return Err(self.abort(in_flight, writer, err).await);
                }
            };

            for skipped in &tile_result.skipped {
                summary.skipped_reads += 1;
                self.observer.error(&format!(
                    "skipped {} for {}: {}",
                    skipped.path.display(),
                    tile,
                    skipped.reason
                ));
            }

            if let Err(err) = writer.write_tile(&tile, &tile_result.buffer) {
                let err = err.in_tile(tile, summary.grid.tile_bounds(&tile));
                return Err(self.abort(in_flight, writer, err).await);
            }
            drop(tile_result);
            summary.tiles_written += 1;

            if summary.tiles_written % self.job.flush_interval == 0 {
                if let Err(err) = writer.checkpoint() {
                    let err = err.in_tile(tile, summary.grid.tile_bounds(&tile));
                    return Err(self.abort(in_flight, writer, err).await);
                }
                summary.checkpoints += 1;
                info!(
                    completed = summary.tiles_written,
                    total, "Checkpoint"
                );
                self.observer.log(&format!(
                    "checkpoint: {}/{} tiles written",
                    summary.tiles_written, total
                ));
            }

            self.observer
                .progress(progress_percent(summary.tiles_written, total));
        }

        let stats = match writer.finish() {
            Ok(stats) => stats,
            Err(err) => return Err(self.fail(err)),
        };
        summary.bytes_written = stats.bytes_written;
        summary.elapsed = started.elapsed();

        self.transition(MergeState::Completed);
        info!(
            tiles = summary.tiles_written,
            checkpoints = summary.checkpoints,
            skipped_reads = summary.skipped_reads,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Merge completed"
        );
        self.observer.log(&format!(
            "completed: {} tiles in {:.2?}",
            summary.tiles_written, summary.elapsed
        ));
        Ok(MergeOutcome::Completed(summary))
    }

    /// Discard in-flight work, persist what was written and stop.
    async fn cancelled(
        &mut self,
        in_flight: JoinSet<(Tile, Result<TileResult>)>,
        writer: D::Writer,
        mut summary: MergeSummary,
        started: Instant,
    ) -> Result<MergeOutcome> {
        let discarded = drain(in_flight).await;
        match writer.finish() {
            Ok(stats) => summary.bytes_written = stats.bytes_written,
            Err(err) => return Err(self.fail(err)),
        }
        summary.elapsed = started.elapsed();

        self.transition(MergeState::Cancelled);
        info!(
            written = summary.tiles_written,
            total = summary.tiles_total,
            discarded,
            "Merge interrupted"
        );
        self.observer.log(&format!(
            "interrupted: {}/{} tiles written",
            summary.tiles_written, summary.tiles_total
        ));
        Ok(MergeOutcome::Cancelled(summary))
    }

    /// Stop the pool, release the output and fail with `err`.
    async fn abort(
        &mut self,
        in_flight: JoinSet<(Tile, Result<TileResult>)>,
        writer: D::Writer,
        err: MosaicError,
    ) -> MosaicError {
        drain(in_flight).await;
        if let Err(close_err) = writer.finish() {
            warn!(error = %close_err, "Failed to release output after error");
        }
        self.fail(err)
    }

    fn fail(&mut self, err: MosaicError) -> MosaicError {
        self.transition(MergeState::Failed);
        error!(error = %err, "Merge failed");
        self.observer.error(&err.to_string());
        err
    }
}

/// Wait for in-flight tiles and drop their results. Returns how many were discarded.
async fn drain(mut in_flight: JoinSet<(Tile, Result<TileResult>)>) -> usize {
    let mut discarded = 0;
    while in_flight.join_next().await.is_some() {
        discarded += 1;
    }
    discarded
}

/// `floor(100 × completed / total)`, clamped to 100.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed as u128 * 100 / total as u128).min(100)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationMethod;
    use crate::io::{MemoryOutputDriver, MemoryRasterReader};
    use crate::types::{Bounds, PixelType, RasterBuffer, Resolution};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Events {
        progress: Mutex<Vec<u8>>,
        logs: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl MergeObserver for Events {
        fn log(&self, message: &str) {
            self.logs.lock().push(message.to_string());
        }
        fn error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
        fn progress(&self, percent: u8) {
            self.progress.lock().push(percent);
        }
    }

    fn reader_with_square(side: usize, value: f64) -> Arc<MemoryRasterReader> {
        let reader = Arc::new(MemoryRasterReader::default());
        let meta = SourceRaster {
            path: PathBuf::from("square"),
            bounds: Bounds::new(0.0, 0.0, side as f64, side as f64),
            resolution: Resolution::new(1.0, 1.0),
            band_count: 1,
            pixel_type: PixelType::Float32,
            nodata: Some(-1.0),
            crs: None,
        };
        reader
            .insert(meta, RasterBuffer::filled(1, side, side, value))
            .unwrap();
        reader
    }

    fn job(block_size: usize, flush_interval: usize) -> MergeJob {
        MergeJob {
            method: AggregationMethod::Mean,
            block_size,
            worker_count: 2,
            flush_interval,
            ..Default::default()
        }
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 3), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(3, 3), 100);
        assert_eq!(progress_percent(0, 0), 100);
    }

    #[test]
    fn test_invalid_job_rejected() {
        let reader = reader_with_square(4, 1.0);
        let result = MergeScheduler::new(reader, MemoryOutputDriver::new(), job(0, 1));
        assert!(matches!(result, Err(MosaicError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_completes() {
        let reader = reader_with_square(8, 3.0);
        let driver = MemoryOutputDriver::new();
        let events = Arc::new(Events::default());
        let mut scheduler = MergeScheduler::new(reader, driver.clone(), job(4, 2))
            .unwrap()
            .with_observer(events.clone());

        let outcome = scheduler
            .run(&[PathBuf::from("square")], Path::new("out"))
            .await
            .unwrap();

        assert_eq!(scheduler.state(), MergeState::Completed);
        let summary = outcome.summary();
        assert_eq!(summary.tiles_total, 4);
        assert_eq!(summary.tiles_written, 4);
        assert_eq!(summary.checkpoints, 2);

        let progress = events.progress.lock().clone();
        assert_eq!(progress, vec![25, 50, 75, 100]);

        let output = driver.output().unwrap();
        assert!(output.finished);
        assert!(output.raster.data.iter().all(|&v| v == 3.0));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let reader = reader_with_square(2, 1.0);
        let mut scheduler =
            MergeScheduler::new(reader, MemoryOutputDriver::new(), job(2, 1)).unwrap();
        scheduler
            .run(&[PathBuf::from("square")], Path::new("out"))
            .await
            .unwrap();
        assert!(scheduler
            .run(&[PathBuf::from("square")], Path::new("out"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_planning_failure() {
        let reader = reader_with_square(2, 1.0);
        let events = Arc::new(Events::default());
        let mut scheduler = MergeScheduler::new(reader, MemoryOutputDriver::new(), job(2, 1))
            .unwrap()
            .with_observer(events.clone());

        let err = scheduler
            .run(&[PathBuf::from("missing")], Path::new("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, MosaicError::UnreadableSource { .. }));
        assert_eq!(scheduler.state(), MergeState::Failed);
        assert_eq!(events.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_is_configuration_error() {
        let reader = reader_with_square(2, 1.0);
        let mut scheduler =
            MergeScheduler::new(reader, MemoryOutputDriver::new(), job(2, 1)).unwrap();
        let err = scheduler.run(&[], Path::new("out")).await.unwrap_err();
        assert!(matches!(err, MosaicError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let reader = reader_with_square(4, 1.0);
        let driver = MemoryOutputDriver::new();
        let mut scheduler = MergeScheduler::new(reader, driver.clone(), job(2, 1)).unwrap();
        scheduler.cancellation_token().cancel();

        let outcome = scheduler
            .run(&[PathBuf::from("square")], Path::new("out"))
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.summary().tiles_written, 0);
        assert_eq!(scheduler.state(), MergeState::Cancelled);
        assert!(driver.output().unwrap().finished);
    }
}
