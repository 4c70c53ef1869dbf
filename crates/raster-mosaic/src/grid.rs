//! Output grid planning.

use tracing::debug;

use crate::aggregate;
use crate::config::MergeJob;
use crate::error::{MosaicError, Result};
use crate::types::{Bounds, GeoTransform, OutputGrid, SourceRaster};

/// Derive the output grid from all sources.
///
/// Bounds are the union of source bounds and the resolution is the finest
/// source resolution per axis. Band count, pixel type, nodata and CRS come
/// from the first source unless the job overrides them.
pub fn plan(sources: &[SourceRaster], job: &MergeJob) -> Result<OutputGrid> {
    let first = sources
        .first()
        .ok_or_else(|| MosaicError::configuration("no input rasters"))?;

    for src in sources {
        if !src.bounds.is_valid() {
            return Err(MosaicError::configuration(format!(
                "{} has invalid bounds {}",
                src.path.display(),
                src.bounds
            )));
        }
        if !(src.resolution.x > 0.0 && src.resolution.y > 0.0) {
            return Err(MosaicError::configuration(format!(
                "{} has non-positive resolution ({}, {})",
                src.path.display(),
                src.resolution.x,
                src.resolution.y
            )));
        }
    }

    let crs = match &job.crs {
        Some(crs) => Some(crs.clone()),
        None => common_crs(sources)?,
    };

    let bounds = sources
        .iter()
        .skip(1)
        .fold(first.bounds, |acc, src| acc.union(&src.bounds));

    let resolution = sources
        .iter()
        .skip(1)
        .fold(first.resolution, |acc, src| acc.finest(&src.resolution));

    let width = (bounds.width() / resolution.x).round();
    let height = (bounds.height() / resolution.y).round();
    if width < 1.0 || height < 1.0 {
        return Err(MosaicError::configuration(format!(
            "output extent {} is smaller than one pixel at resolution ({}, {})",
            bounds, resolution.x, resolution.y
        )));
    }

    let pixel_type = job.pixel_type.unwrap_or(first.pixel_type);

    // Float outputs fall back to NaN; integer outputs need an explicit sentinel.
    let nodata = match job.nodata.or(first.nodata) {
        Some(v) if v.is_nan() && !pixel_type.is_float() => {
            return Err(MosaicError::configuration(format!(
                "NaN nodata cannot be stored in {} output; configure an explicit nodata value",
                pixel_type
            )))
        }
        Some(v) if v.is_nan() => v,
        Some(v) => aggregate::cast_to(pixel_type, v),
        None if pixel_type.is_float() => f64::NAN,
        None => {
            return Err(MosaicError::configuration(format!(
                "{} declares no nodata value and none was configured for {} output",
                first.path.display(),
                pixel_type
            )))
        }
    };

    let grid = OutputGrid {
        bounds,
        resolution,
        width: width as usize,
        height: height as usize,
        transform: GeoTransform::from_origin(bounds.left, bounds.top, resolution),
        band_count: first.band_count,
        pixel_type,
        nodata,
        crs,
    };

    debug!(
        width = grid.width,
        height = grid.height,
        res_x = resolution.x,
        res_y = resolution.y,
        bounds = %grid.bounds,
        "Planned output grid"
    );

    Ok(grid)
}

/// The single CRS shared by all sources that declare one.
fn common_crs(sources: &[SourceRaster]) -> Result<Option<String>> {
    let mut found: Option<&str> = None;
    for src in sources {
        let Some(crs) = src.crs.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        match found {
            None => found = Some(crs),
            Some(existing) if existing == crs => {}
            Some(existing) => {
                return Err(MosaicError::configuration(format!(
                    "conflicting CRS '{}' and '{}' ({}); set an output CRS override",
                    existing,
                    crs,
                    src.path.display()
                )));
            }
        }
    }
    Ok(found.map(str::to_string))
}

/// Bounds of the output grid snapped to whole pixels.
pub fn snapped_bounds(grid: &OutputGrid) -> Bounds {
    grid.transform.window_bounds(0, 0, grid.width, grid.height)
}
