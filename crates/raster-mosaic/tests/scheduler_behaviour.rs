//! Scheduler lifecycle: cancellation, faulty sources, pool bounds and
//! reproducible output.

mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{memory_reader, spec_from, write_sources, ND};
use raster_mosaic::scheduler::progress_percent;
use raster_mosaic::testdata::{RecordingObserver, SourceSpec};
use raster_mosaic::{
    AggregationMethod, Bounds, MemoryOutputDriver, MemoryRasterReader, MergeJob, MergeScheduler,
    MergeState, MosaicError, MosaicService, RasterBuffer, RasterReader, SourceRaster, Tile,
};
use test_utils::fixtures::{strip_of_five, three_rasters, RasterSpec};
use tokio_util::sync::CancellationToken;

fn job(block_size: usize, worker_count: usize) -> MergeJob {
    MergeJob {
        method: AggregationMethod::Mean,
        block_size,
        worker_count,
        flush_interval: 4,
        ..Default::default()
    }
}

const LARGE: RasterSpec = RasterSpec {
    name: "large",
    extent: (0.0, 0.0, 64.0, 64.0),
    width: 64,
    height: 64,
};

#[tokio::test]
async fn test_cancellation_stops_after_requested_writes() {
    let (reader, inputs) = memory_reader(&[("large", spec_from(&LARGE, 4.0))]);
    let driver = MemoryOutputDriver::new();
    let token = CancellationToken::new();
    let observer = Arc::new(RecordingObserver::cancelling_after(5, token.clone()));

    let mut scheduler = MergeScheduler::new(reader, driver.clone(), job(4, 2))
        .unwrap()
        .with_observer(observer.clone())
        .with_cancellation(token);
    let outcome = scheduler.run(&inputs, Path::new("out")).await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(scheduler.state(), MergeState::Cancelled);

    let summary = outcome.summary();
    assert_eq!(summary.tiles_total, 256);
    assert!(summary.tiles_written <= 5);

    let progress = observer.progress_reports();
    assert!(progress.len() <= 5);
    let bound = progress_percent(5, 256);
    assert!(progress.iter().all(|&p| p <= bound));

    // Everything written before the stop is persisted; the rest is nodata.
    let output = driver.output().unwrap();
    assert!(output.finished);
    assert_eq!(output.persisted.len(), summary.tiles_written);
    let covered: usize = output.persisted.iter().map(|t| t.area()).sum();
    let valid = output.raster.data.iter().filter(|&&v| v == 4.0).count();
    assert_eq!(valid, covered);
}

#[tokio::test]
async fn test_cancel_before_run_writes_nothing() {
    let (reader, inputs) = memory_reader(&[("large", spec_from(&LARGE, 4.0))]);
    let driver = MemoryOutputDriver::new();
    let mut scheduler = MergeScheduler::new(reader, driver.clone(), job(16, 2)).unwrap();
    scheduler.cancellation_token().cancel();

    let outcome = scheduler.run(&inputs, Path::new("out")).await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.summary().tiles_written, 0);
    assert!(driver.output().unwrap().persisted.is_empty());
}

#[tokio::test]
async fn test_failing_source_is_skipped() {
    let specs: Vec<(&str, SourceSpec)> = strip_of_five::RASTERS
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name, spec_from(r, (i + 1) as f64)))
        .collect();
    let (reader, inputs) = memory_reader(&specs);
    reader.fail_reads_for("s2");

    let driver = MemoryOutputDriver::new();
    let observer = Arc::new(RecordingObserver::new());
    let mut scheduler = MergeScheduler::new(reader, driver.clone(), job(4, 3))
        .unwrap()
        .with_observer(observer.clone());
    let outcome = scheduler.run(&inputs, Path::new("out")).await.unwrap();

    assert!(!outcome.is_cancelled());
    let summary = outcome.summary();
    assert_eq!(summary.tiles_written, summary.tiles_total);
    assert!(summary.skipped_reads > 0);
    assert_eq!(observer.errors().len(), summary.skipped_reads);
    assert!(observer.errors().iter().all(|e| e.contains("s2")));

    let out = driver.output().unwrap().raster;
    assert_eq!((out.width, out.height), (36, 8));
    for row in 0..8 {
        for col in 0..36 {
            let value = out.get(0, col, row).unwrap();
            if (15..=20).contains(&col) {
                assert_eq!(value, ND, "col {} is only covered by the failed source", col);
            } else {
                assert_ne!(value, ND, "col {} has a readable source", col);
            }
        }
    }
}

/// Reader that records how many reads run at once.
struct CountingReader {
    inner: MemoryRasterReader,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RasterReader for CountingReader {
    fn open(&self, path: &Path) -> raster_mosaic::Result<SourceRaster> {
        self.inner.open(path)
    }

    fn read_window(
        &self,
        source: &SourceRaster,
        window: &Bounds,
        out_width: usize,
        out_height: usize,
        fill_value: f64,
    ) -> raster_mosaic::Result<RasterBuffer> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        let result = self
            .inner
            .read_window(source, window, out_width, out_height, fill_value);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bounded_by_worker_count() {
    let spec = spec_from(&LARGE, 1.0);
    let inner = MemoryRasterReader::default();
    inner
        .insert(spec.source_raster("large"), spec.buffer().unwrap())
        .unwrap();
    let reader = Arc::new(CountingReader {
        inner,
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });

    let mut scheduler =
        MergeScheduler::new(reader.clone(), MemoryOutputDriver::new(), job(8, 3)).unwrap();
    let outcome = scheduler
        .run(&[PathBuf::from("large")], Path::new("out"))
        .await
        .unwrap();

    assert_eq!(outcome.summary().tiles_written, 64);
    let peak = reader.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak concurrency {}", peak);
}

/// Reader whose window reads panic.
struct PanickingReader(MemoryRasterReader);

impl RasterReader for PanickingReader {
    fn open(&self, path: &Path) -> raster_mosaic::Result<SourceRaster> {
        self.0.open(path)
    }

    fn read_window(
        &self,
        _source: &SourceRaster,
        _window: &Bounds,
        _out_width: usize,
        _out_height: usize,
        _fill_value: f64,
    ) -> raster_mosaic::Result<RasterBuffer> {
        panic!("decoder blew up");
    }
}

#[tokio::test]
async fn test_worker_panic_fails_merge() {
    let spec = spec_from(&LARGE, 1.0);
    let inner = MemoryRasterReader::default();
    inner
        .insert(spec.source_raster("large"), spec.buffer().unwrap())
        .unwrap();

    let driver = MemoryOutputDriver::new();
    let mut scheduler =
        MergeScheduler::new(Arc::new(PanickingReader(inner)), driver.clone(), job(16, 2)).unwrap();
    let err = scheduler
        .run(&[PathBuf::from("large")], Path::new("out"))
        .await
        .unwrap_err();

    assert!(matches!(err, MosaicError::TileFailed { .. }));
    assert_eq!(scheduler.state(), MergeState::Failed);
    assert!(driver.output().unwrap().finished);
}

/// Reader whose decoder fails with an error that is not a missing or
/// unreadable source.
struct CorruptDecoderReader(MemoryRasterReader);

impl RasterReader for CorruptDecoderReader {
    fn open(&self, path: &Path) -> raster_mosaic::Result<SourceRaster> {
        self.0.open(path)
    }

    fn read_window(
        &self,
        _source: &SourceRaster,
        _window: &Bounds,
        _out_width: usize,
        _out_height: usize,
        _fill_value: f64,
    ) -> raster_mosaic::Result<RasterBuffer> {
        Err(MosaicError::Internal("checksum mismatch in decoded block".to_string()))
    }
}

#[tokio::test]
async fn test_non_recoverable_read_error_fails_tile() {
    let spec = spec_from(&LARGE, 1.0);
    let inner = MemoryRasterReader::default();
    inner
        .insert(spec.source_raster("large"), spec.buffer().unwrap())
        .unwrap();

    let observer = Arc::new(RecordingObserver::default());
    let driver = MemoryOutputDriver::new();
    let mut scheduler =
        MergeScheduler::new(Arc::new(CorruptDecoderReader(inner)), driver.clone(), job(16, 1))
            .unwrap()
            .with_observer(observer.clone());
    let err = scheduler
        .run(&[PathBuf::from("large")], Path::new("out"))
        .await
        .unwrap_err();

    match err {
        MosaicError::TileFailed {
            tile,
            bounds,
            source,
        } => {
            assert_eq!(tile, Tile::new(0, 0, 16, 16));
            assert_eq!(bounds, Bounds::new(0.0, 48.0, 16.0, 64.0));
            assert!(matches!(*source, MosaicError::Internal(_)));
        }
        other => panic!("expected TileFailed, got {}", other),
    }
    assert_eq!(scheduler.state(), MergeState::Failed);
    assert_eq!(observer.errors().len(), 1);

    let output = driver.output().unwrap();
    assert!(output.finished);
    assert!(output.persisted.is_empty());
}

#[tokio::test]
async fn test_scheduler_runs_once() {
    let (reader, inputs) = memory_reader(&[("large", spec_from(&LARGE, 1.0))]);
    let mut scheduler = MergeScheduler::new(reader, MemoryOutputDriver::new(), job(32, 2)).unwrap();
    scheduler.run(&inputs, Path::new("out")).await.unwrap();
    assert_eq!(scheduler.state(), MergeState::Completed);

    let err = scheduler.run(&inputs, Path::new("out")).await.unwrap_err();
    assert!(matches!(err, MosaicError::Internal(_)));
}

#[test]
fn test_invalid_job_is_rejected() {
    let reader = Arc::new(MemoryRasterReader::default());
    let result = MergeScheduler::new(reader, MemoryOutputDriver::new(), job(0, 2));
    assert!(matches!(result, Err(MosaicError::Configuration(_))));
}

fn three_constant_sources() -> Vec<(&'static str, SourceSpec)> {
    vec![
        ("a", spec_from(&three_rasters::A, 1.0)),
        ("b", spec_from(&three_rasters::B, 2.0)),
        ("c", spec_from(&three_rasters::C, 3.0)),
    ]
}

#[tokio::test]
async fn test_output_is_reproducible() {
    let dir = test_utils::temp_test_dir();
    let inputs = write_sources(dir.path(), &three_constant_sources());

    let serial = dir.path().join("serial.zarr");
    let parallel = dir.path().join("parallel.zarr");

    MosaicService::new(job(8, 1))
        .unwrap()
        .merge(&inputs, &serial, CancellationToken::new())
        .await
        .unwrap();
    MosaicService::new(job(8, 4))
        .unwrap()
        .merge(&inputs, &parallel, CancellationToken::new())
        .await
        .unwrap();

    let a = test_utils::snapshot_dir(&serial).unwrap();
    let b = test_utils::snapshot_dir(&parallel).unwrap();
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_rerun_replaces_output() {
    let dir = test_utils::temp_test_dir();
    let inputs = write_sources(dir.path(), &three_constant_sources());
    let output = dir.path().join("mosaic.zarr");

    let service = MosaicService::new(job(8, 2)).unwrap();
    service
        .merge(&inputs, &output, CancellationToken::new())
        .await
        .unwrap();
    let first = test_utils::snapshot_dir(&output).unwrap();

    service
        .merge(&inputs, &output, CancellationToken::new())
        .await
        .unwrap();
    let second = test_utils::snapshot_dir(&output).unwrap();
    assert_eq!(first, second);
}
