//! Overlap resolution through the full scheduler, on the in-memory backend.

mod common;

use std::path::Path;

use common::{memory_reader, spec_from, ND};
use raster_mosaic::testdata::SourceSpec;
use raster_mosaic::{
    AggregationMethod, Bounds, MemoryOutputDriver, MergeJob, MergeScheduler, MosaicError, PixelType,
    RasterBuffer,
};
use test_utils::fixtures::overlap_pair;

fn job(method: AggregationMethod, block_size: usize) -> MergeJob {
    MergeJob {
        method,
        block_size,
        worker_count: 3,
        pixel_type: None,
        flush_interval: 2,
        ..Default::default()
    }
}

async fn merge(specs: &[(&str, SourceSpec)], job: MergeJob) -> RasterBuffer {
    let (reader, inputs) = memory_reader(specs);
    let driver = MemoryOutputDriver::new();
    let mut scheduler = MergeScheduler::new(reader, driver.clone(), job).unwrap();
    let outcome = scheduler.run(&inputs, Path::new("out")).await.unwrap();
    assert!(!outcome.is_cancelled());

    let output = driver.output().unwrap();
    assert!(output.finished);
    assert!(output.pending.is_empty());
    output.raster
}

fn pair() -> Vec<(&'static str, SourceSpec)> {
    vec![
        ("a", spec_from(&overlap_pair::A, 1.0)),
        ("b", spec_from(&overlap_pair::B, 2.0)),
    ]
}

#[tokio::test]
async fn test_shared_pixel_per_method() {
    let expected = [
        (AggregationMethod::Mean, 1.5),
        (AggregationMethod::Max, 2.0),
        (AggregationMethod::Min, 1.0),
        (AggregationMethod::Sum, 3.0),
        (AggregationMethod::First, 1.0),
        (AggregationMethod::Last, 2.0),
    ];
    let (col, row) = overlap_pair::SHARED_PIXEL;

    for (method, value) in expected {
        let out = merge(&pair(), job(method, 2)).await;
        assert_eq!((out.width, out.height), (3, 3));
        assert_eq!(out.get(0, col, row), Some(value), "method {}", method);
    }
}

#[tokio::test]
async fn test_single_contributor_pixels_pass_through() {
    for method in AggregationMethod::ALL {
        let out = merge(&pair(), job(method, 2)).await;
        // A alone
        assert_eq!(out.get(0, 0, 0), Some(1.0));
        assert_eq!(out.get(0, 1, 0), Some(1.0));
        assert_eq!(out.get(0, 0, 1), Some(1.0));
        // B alone
        assert_eq!(out.get(0, 2, 1), Some(2.0));
        assert_eq!(out.get(0, 1, 2), Some(2.0));
        assert_eq!(out.get(0, 2, 2), Some(2.0));
    }
}

#[tokio::test]
async fn test_uncovered_pixels_are_nodata() {
    for method in AggregationMethod::ALL {
        let out = merge(&pair(), job(method, 2)).await;
        assert_eq!(out.get(0, 2, 0), Some(ND), "method {}", method);
        assert_eq!(out.get(0, 0, 2), Some(ND), "method {}", method);
    }
}

#[tokio::test]
async fn test_nodata_never_contributes() {
    // B's copy of the shared pixel is nodata: every method sees only A.
    let mut b = spec_from(&overlap_pair::B, 2.0);
    b.set(0, 0, ND);
    let specs = vec![("a", spec_from(&overlap_pair::A, 1.0)), ("b", b)];
    let (col, row) = overlap_pair::SHARED_PIXEL;

    for method in AggregationMethod::ALL {
        let out = merge(&specs, job(method, 2)).await;
        assert_eq!(out.get(0, col, row), Some(1.0), "method {}", method);
    }
}

#[tokio::test]
async fn test_all_nodata_pixel_stays_nodata() {
    let mut a = spec_from(&overlap_pair::A, 1.0);
    a.set(1, 1, ND);
    let mut b = spec_from(&overlap_pair::B, 2.0);
    b.set(0, 0, ND);
    let specs = vec![("a", a), ("b", b)];
    let (col, row) = overlap_pair::SHARED_PIXEL;

    for method in AggregationMethod::ALL {
        let out = merge(&specs, job(method, 2)).await;
        assert_eq!(out.get(0, col, row), Some(ND), "method {}", method);
    }
}

#[tokio::test]
async fn test_result_independent_of_block_size() {
    for method in AggregationMethod::ALL {
        let reference = merge(&pair(), job(method, 512)).await;
        for block_size in [1, 2, 3] {
            let out = merge(&pair(), job(method, block_size)).await;
            assert_eq!(out, reference, "method {} block {}", method, block_size);
        }
    }
}

#[tokio::test]
async fn test_first_and_last_follow_input_order() {
    let reversed: Vec<_> = pair().into_iter().rev().collect();
    let (col, row) = overlap_pair::SHARED_PIXEL;

    let first = merge(&reversed, job(AggregationMethod::First, 2)).await;
    assert_eq!(first.get(0, col, row), Some(2.0));

    let last = merge(&reversed, job(AggregationMethod::Last, 2)).await;
    assert_eq!(last.get(0, col, row), Some(1.0));
}

#[tokio::test]
async fn test_integer_output_rounds_mean() {
    let mut job = job(AggregationMethod::Mean, 2);
    job.pixel_type = Some(PixelType::Int16);
    let out = merge(&pair(), job).await;
    let (col, row) = overlap_pair::SHARED_PIXEL;
    // 1.5 rounds half away from zero.
    assert_eq!(out.get(0, col, row), Some(2.0));
}

#[tokio::test]
async fn test_nan_nodata_source_into_integer_output() {
    let mut spec =
        SourceSpec::constant(Bounds::new(0.0, 0.0, 2.0, 2.0), 2, 2, 5.0).with_nodata(f64::NAN);
    spec.set(0, 0, f64::NAN);
    let specs = [("nan_float", spec)];

    // Without an explicit sentinel the job is rejected before any output exists.
    let (reader, inputs) = memory_reader(&specs);
    let driver = MemoryOutputDriver::new();
    let mut int_job = job(AggregationMethod::Mean, 2);
    int_job.pixel_type = Some(PixelType::Int16);
    let mut scheduler = MergeScheduler::new(reader, driver.clone(), int_job.clone()).unwrap();
    let err = scheduler.run(&inputs, Path::new("out")).await.unwrap_err();
    assert!(matches!(err, MosaicError::Configuration(_)));
    assert!(driver.output().is_none());

    int_job.nodata = Some(-32768.0);
    let out = merge(&specs, int_job).await;
    assert_eq!(out.get(0, 0, 0), Some(-32768.0));
    assert_eq!(out.get(0, 1, 1), Some(5.0));
    assert!(out.data.iter().all(|v| !v.is_nan()));
}

#[tokio::test]
async fn test_scheduler_reports_summary() {
    let (reader, inputs) = memory_reader(&pair());
    let driver = MemoryOutputDriver::new();
    let mut scheduler =
        MergeScheduler::new(reader, driver.clone(), job(AggregationMethod::Max, 2)).unwrap();
    let outcome = scheduler.run(&inputs, Path::new("out")).await.unwrap();

    let summary = outcome.summary();
    assert_eq!(summary.tiles_total, 4);
    assert_eq!(summary.tiles_written, 4);
    assert_eq!(summary.checkpoints, 2);
    assert_eq!(summary.skipped_reads, 0);
    assert_eq!(summary.grid.width, 3);
    assert_eq!(driver.output().unwrap().persisted.len(), 4);
}
