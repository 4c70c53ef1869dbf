//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use raster_mosaic::testdata::{write_source_zarr, SourceSpec};
use raster_mosaic::{
    Bounds, MemoryRasterReader, RasterBuffer, RasterReader, SourceRaster, ZarrRasterReader,
};
use test_utils::RasterSpec;

pub const ND: f64 = test_utils::nodata::DEM;

pub fn bounds(extent: (f64, f64, f64, f64)) -> Bounds {
    Bounds::new(extent.0, extent.1, extent.2, extent.3)
}

/// A constant single-band spec laid out per a fixture.
pub fn spec_from(fixture: &RasterSpec, value: f64) -> SourceSpec {
    SourceSpec::constant(bounds(fixture.extent), fixture.width, fixture.height, value)
        .with_nodata(ND)
}

/// Write each spec as `<dir>/<name>.zarr`, returning paths in the given order.
pub fn write_sources(dir: &Path, specs: &[(&str, SourceSpec)]) -> Vec<PathBuf> {
    specs
        .iter()
        .map(|(name, spec)| {
            let path = test_utils::zarr_path(dir, name);
            write_source_zarr(&path, spec, 4).unwrap();
            path
        })
        .collect()
}

/// Register specs with an in-memory reader under their names.
pub fn memory_reader(specs: &[(&str, SourceSpec)]) -> (Arc<MemoryRasterReader>, Vec<PathBuf>) {
    let reader = Arc::new(MemoryRasterReader::default());
    let mut paths = Vec::new();
    for (name, spec) in specs {
        let path = PathBuf::from(name);
        reader
            .insert(spec.source_raster(&path), spec.buffer().unwrap())
            .unwrap();
        paths.push(path);
    }
    (reader, paths)
}

/// Read a whole Zarr raster back at its native resolution.
pub fn read_zarr(path: &Path) -> (SourceRaster, RasterBuffer) {
    let reader = ZarrRasterReader::new(16 << 20, Default::default());
    let meta = reader.open(path).unwrap();
    let (w, h) = meta.shape();
    let fill = meta.nodata.unwrap_or(f64::NAN);
    let buf = reader.read_window(&meta, &meta.bounds, w, h, fill).unwrap();
    (meta, buf)
}
