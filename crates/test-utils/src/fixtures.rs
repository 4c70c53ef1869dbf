//! Common test fixtures for mosaic tests.
//!
//! Extents are `(left, bottom, right, top)` tuples so this crate stays
//! independent of the library's own types.

/// Common nodata sentinels.
pub mod nodata {
    /// The conventional DEM sentinel.
    pub const DEM: f64 = -9999.0;

    /// Zero, as used by 8-bit imagery.
    pub const ZERO: f64 = 0.0;
}

/// Common CRS identifiers.
pub mod crs {
    /// WGS84 geographic
    pub const EPSG_4326: &str = "EPSG:4326";

    /// Web Mercator
    pub const EPSG_3857: &str = "EPSG:3857";

    /// UTM zone 32N
    pub const EPSG_32632: &str = "EPSG:32632";
}

/// One synthetic source raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterSpec {
    pub name: &'static str,
    pub extent: (f64, f64, f64, f64),
    pub width: usize,
    pub height: usize,
}

impl RasterSpec {
    /// Pixel size `(x, y)`.
    pub fn resolution(&self) -> (f64, f64) {
        let (l, b, r, t) = self.extent;
        ((r - l) / self.width as f64, (t - b) / self.height as f64)
    }

    pub fn size(&self) -> usize {
        self.width * self.height
    }
}

/// Two 2x2 rasters at resolution 1 sharing exactly one pixel, (1..2, 1..2).
pub mod overlap_pair {
    use super::RasterSpec;

    pub const A: RasterSpec = RasterSpec {
        name: "a",
        extent: (0.0, 1.0, 2.0, 3.0),
        width: 2,
        height: 2,
    };

    pub const B: RasterSpec = RasterSpec {
        name: "b",
        extent: (1.0, 0.0, 3.0, 2.0),
        width: 2,
        height: 2,
    };

    /// Union of both extents.
    pub const UNION: (f64, f64, f64, f64) = (0.0, 0.0, 3.0, 3.0);

    /// Output pixel `(col, row)` of the shared pixel in the 3x3 union grid.
    pub const SHARED_PIXEL: (usize, usize) = (1, 1);
}

/// Three 10x10 rasters, resolutions 1, 1 and 2, meeting in a 2x2 corner.
///
/// The corner `(8..10, 8..10)` is covered by `A`, `B` and by one coarse
/// pixel of `C`. `C`'s bottom row also lies over `A`; tests keep it
/// nodata outside the corner.
pub mod three_rasters {
    use super::RasterSpec;

    pub const A: RasterSpec = RasterSpec {
        name: "a",
        extent: (0.0, 0.0, 10.0, 10.0),
        width: 10,
        height: 10,
    };

    pub const B: RasterSpec = RasterSpec {
        name: "b",
        extent: (8.0, 8.0, 18.0, 18.0),
        width: 10,
        height: 10,
    };

    pub const C: RasterSpec = RasterSpec {
        name: "c",
        extent: (-10.0, 8.0, 10.0, 28.0),
        width: 10,
        height: 10,
    };

    /// Value each raster carries inside the shared corner.
    pub const CORNER_VALUES: [f64; 3] = [5.0, 7.0, 9.0];

    /// The shared corner.
    pub const CORNER: (f64, f64, f64, f64) = (8.0, 8.0, 10.0, 10.0);

    /// Union of all three.
    pub const UNION: (f64, f64, f64, f64) = (-10.0, 0.0, 18.0, 28.0);
}

/// Five rasters laid out in a row with a one-unit overlap between
/// neighbours; used for fault injection.
pub mod strip_of_five {
    use super::RasterSpec;

    pub const RASTERS: [RasterSpec; 5] = [
        RasterSpec { name: "s0", extent: (0.0, 0.0, 8.0, 8.0), width: 8, height: 8 },
        RasterSpec { name: "s1", extent: (7.0, 0.0, 15.0, 8.0), width: 8, height: 8 },
        RasterSpec { name: "s2", extent: (14.0, 0.0, 22.0, 8.0), width: 8, height: 8 },
        RasterSpec { name: "s3", extent: (21.0, 0.0, 29.0, 8.0), width: 8, height: 8 },
        RasterSpec { name: "s4", extent: (28.0, 0.0, 36.0, 8.0), width: 8, height: 8 },
    ];

    /// Union of all five.
    pub const UNION: (f64, f64, f64, f64) = (0.0, 0.0, 36.0, 8.0);
}
