//! Runs the mosaicker binary end to end.

use std::path::Path;
use std::process::Command;

use raster_mosaic::testdata::{write_source_zarr, SourceSpec};
use raster_mosaic::{Bounds, RasterReader, ZarrRasterReader};

fn mosaicker() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mosaicker"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn write_pair(dir: &Path) {
    let a = SourceSpec::constant(Bounds::new(0.0, 1.0, 2.0, 3.0), 2, 2, 1.0).with_nodata(-9999.0);
    let b = SourceSpec::constant(Bounds::new(1.0, 0.0, 3.0, 2.0), 2, 2, 3.0).with_nodata(-9999.0);
    write_source_zarr(&dir.join("a.zarr"), &a, 2).unwrap();
    write_source_zarr(&dir.join("b.zarr"), &b, 2).unwrap();
}

fn shared_pixel(output: &Path) -> f64 {
    let reader = ZarrRasterReader::new(1 << 20, Default::default());
    let meta = reader.open(output).unwrap();
    assert_eq!(meta.shape(), (3, 3));
    let buf = reader.read_window(&meta, &meta.bounds, 3, 3, -9999.0).unwrap();
    buf.get(0, 1, 1).unwrap()
}

#[test]
fn test_merges_discovered_inputs() {
    let dir = test_utils::temp_test_dir();
    let inputs = dir.path().join("tiles");
    write_pair(&inputs);
    let output = dir.path().join("mosaic.zarr");

    let status = mosaicker()
        .arg("--input-dir")
        .arg(&inputs)
        .args(["--method", "max", "--block-size", "2"])
        .arg("--output")
        .arg(&output)
        .status()
        .unwrap();

    assert!(status.success());
    assert_eq!(shared_pixel(&output), 3.0);
}

#[test]
fn test_yaml_config_and_cli_precedence() {
    let dir = test_utils::temp_test_dir();
    write_pair(dir.path());
    let config = dir.path().join("mosaic.yaml");
    std::fs::write(&config, "method: min\nworker_count: 2\nflush_interval: 1\n").unwrap();

    let from_file = dir.path().join("from_file.zarr");
    let status = mosaicker()
        .arg("--config")
        .arg(&config)
        .arg("-o")
        .arg(&from_file)
        .arg(dir.path().join("a.zarr"))
        .arg(dir.path().join("b.zarr"))
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(shared_pixel(&from_file), 1.0);

    let from_cli = dir.path().join("from_cli.zarr");
    let status = mosaicker()
        .arg("--config")
        .arg(&config)
        .args(["--method", "mean"])
        .arg("-o")
        .arg(&from_cli)
        .arg(dir.path().join("a.zarr"))
        .arg(dir.path().join("b.zarr"))
        .status()
        .unwrap();
    assert!(status.success());
    assert_eq!(shared_pixel(&from_cli), 2.0);
}

#[test]
fn test_fails_without_inputs() {
    let dir = test_utils::temp_test_dir();
    let status = mosaicker()
        .arg("--input-dir")
        .arg(dir.path())
        .arg("-o")
        .arg(dir.path().join("out.zarr"))
        .status()
        .unwrap();

    assert!(!status.success());
    assert_ne!(status.code(), Some(130));
    assert!(!dir.path().join("out.zarr").exists());
}

#[test]
fn test_fails_on_unreadable_input() {
    let dir = test_utils::temp_test_dir();
    let status = mosaicker()
        .arg("-o")
        .arg(dir.path().join("out.zarr"))
        .arg(dir.path().join("missing.zarr"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
