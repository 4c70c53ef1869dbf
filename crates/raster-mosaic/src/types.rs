//! Core types for raster mosaicking.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MosaicError;

/// A georeferenced rectangle in the rasters' coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    /// Create new bounds.
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Check if these bounds intersect another rectangle (edges touching counts).
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(self.right < other.left
            || self.left > other.right
            || self.top < other.bottom
            || self.bottom > other.top)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }

    /// Get the width in CRS units.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// Get the height in CRS units.
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Check if a point is contained within these bounds.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.right && y >= self.bottom && y <= self.top
    }

    /// True when all four edges are finite and the rectangle is not inverted.
    pub fn is_valid(&self) -> bool {
        [self.left, self.bottom, self.right, self.top]
            .iter()
            .all(|v| v.is_finite())
            && self.right >= self.left
            && self.top >= self.bottom
    }

    /// Parse from a `[left, bottom, right, top]` JSON array.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let arr = value.as_array()?;
        if arr.len() != 4 {
            return None;
        }
        Some(Bounds::new(
            arr[0].as_f64()?,
            arr[1].as_f64()?,
            arr[2].as_f64()?,
            arr[3].as_f64()?,
        ))
    }

    /// Serialize as a `[left, bottom, right, top]` JSON array.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!([self.left, self.bottom, self.right, self.top])
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.left, self.bottom, self.right, self.top
        )
    }
}

/// Pixel size in CRS units (both components positive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Component-wise minimum (the finer of the two).
    pub fn finest(&self, other: &Resolution) -> Resolution {
        Resolution {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
        }
    }
}

/// North-up affine transform from pixel (col, row) to CRS coordinates.
///
/// `x = origin_x + col * pixel_width`, `y = origin_y - row * pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Anchor a transform at the top-left corner of `bounds`.
    pub fn from_origin(left: f64, top: f64, resolution: Resolution) -> Self {
        Self {
            origin_x: left,
            origin_y: top,
            pixel_width: resolution.x,
            pixel_height: resolution.y,
        }
    }

    /// CRS coordinate of a pixel corner.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y - row * self.pixel_height,
        )
    }

    /// Fractional pixel position of a CRS coordinate.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// Geographic rectangle covered by a pixel window.
    pub fn window_bounds(&self, col: usize, row: usize, width: usize, height: usize) -> Bounds {
        let (left, top) = self.pixel_to_geo(col as f64, row as f64);
        let (right, bottom) = self.pixel_to_geo((col + width) as f64, (row + height) as f64);
        Bounds::new(left, bottom, right, top)
    }

    /// GDAL-ordered coefficients `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            -self.pixel_height,
        ]
    }
}

/// Storage type of raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    #[default]
    Float32,
    Float64,
}

impl PixelType {
    /// Canonical lowercase name (matches Zarr data type names).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Bytes per pixel.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl FromStr for PixelType {
    type Err = MosaicError;

    /// Accepts both Zarr names (`uint8`) and GDAL names (`Byte`, `Float32`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "byte" | "uint8" | "u8" => Ok(Self::UInt8),
            "int16" | "i16" => Ok(Self::Int16),
            "uint16" | "u16" => Ok(Self::UInt16),
            "int32" | "i32" => Ok(Self::Int32),
            "uint32" | "u32" => Ok(Self::UInt32),
            "float32" | "f32" => Ok(Self::Float32),
            "float64" | "f64" => Ok(Self::Float64),
            other => Err(MosaicError::configuration(format!(
                "unsupported pixel type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Georeferenced metadata of one input raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRaster {
    pub path: PathBuf,
    pub bounds: Bounds,
    pub resolution: Resolution,
    pub band_count: usize,
    pub pixel_type: PixelType,
    pub nodata: Option<f64>,
    pub crs: Option<String>,
}

impl SourceRaster {
    /// Pixel dimensions implied by bounds and resolution.
    pub fn shape(&self) -> (usize, usize) {
        (
            (self.bounds.width() / self.resolution.x).round() as usize,
            (self.bounds.height() / self.resolution.y).round() as usize,
        )
    }

    /// Transform anchored at this raster's top-left corner.
    pub fn transform(&self) -> GeoTransform {
        GeoTransform::from_origin(self.bounds.left, self.bounds.top, self.resolution)
    }
}

/// The planned output raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputGrid {
    pub bounds: Bounds,
    pub resolution: Resolution,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub band_count: usize,
    pub pixel_type: PixelType,
    pub nodata: f64,
    pub crs: Option<String>,
}

impl OutputGrid {
    /// Geographic rectangle covered by a tile.
    pub fn tile_bounds(&self, tile: &Tile) -> Bounds {
        self.transform
            .window_bounds(tile.col, tile.row, tile.width, tile.height)
    }

    /// Total number of pixels per band.
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// A rectangular block of the output pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub col: usize,
    pub row: usize,
    pub width: usize,
    pub height: usize,
}

impl Tile {
    pub fn new(col: usize, row: usize, width: usize, height: usize) -> Self {
        Self {
            col,
            row,
            width,
            height,
        }
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Check whether a pixel falls inside this tile.
    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col && col < self.col + self.width && row >= self.row && row < self.row + self.height
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tile(col={}, row={}, {}x{})",
            self.col, self.row, self.width, self.height
        )
    }
}

/// Band-major pixel buffer `[bands][height][width]` in the f64 working type.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    pub bands: usize,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl RasterBuffer {
    /// Create a buffer with every pixel set to `value`.
    pub fn filled(bands: usize, width: usize, height: usize, value: f64) -> Self {
        Self {
            bands,
            width,
            height,
            data: vec![value; bands * width * height],
        }
    }

    /// Wrap existing band-major data; the length must match the shape.
    pub fn from_vec(bands: usize, width: usize, height: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != bands * width * height {
            return None;
        }
        Some(Self {
            bands,
            width,
            height,
            data,
        })
    }

    /// Pixels per band.
    pub fn band_len(&self) -> usize {
        self.width * self.height
    }

    pub fn band(&self, band: usize) -> &[f64] {
        let n = self.band_len();
        &self.data[band * n..(band + 1) * n]
    }

    pub fn band_mut(&mut self, band: usize) -> &mut [f64] {
        let n = self.band_len();
        &mut self.data[band * n..(band + 1) * n]
    }

    /// Get the value at (band, col, row).
    pub fn get(&self, band: usize, col: usize, row: usize) -> Option<f64> {
        if band >= self.bands || col >= self.width || row >= self.height {
            return None;
        }
        self.data
            .get(band * self.band_len() + row * self.width + col)
            .copied()
    }

    pub fn set(&mut self, band: usize, col: usize, row: usize, value: f64) {
        let n = self.band_len();
        self.data[band * n + row * self.width + col] = value;
    }

    /// Size in bytes of the working buffer.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}
