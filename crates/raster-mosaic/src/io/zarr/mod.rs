//! Zarr V3 raster backend on the local filesystem.
//!
//! Arrays are laid out `[bands, rows, cols]` (a 2-D `[rows, cols]` array is
//! read as a single band). Georeferencing lives in the array attributes:
//!
//! ```json
//! { "bounds": [left, bottom, right, top], "crs": "EPSG:4326", "nodata": -9999 }
//! ```
//!
//! A NaN nodata is stored as the string `"NaN"` since JSON has no NaN.

mod reader;
mod writer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;
use zarrs::array::DataType;

use crate::config::CreationOptions;
use crate::error::{MosaicError, Result};
use crate::types::PixelType;

pub use reader::ZarrRasterReader;
pub use writer::{ZarrOutputDriver, ZarrRasterWriter};

/// Compression codec for output chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZarrCompression {
    None,
    Lz4,
    Zstd,
    BloscLz4,
    #[default]
    BloscZstd,
}

impl ZarrCompression {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZarrCompression::None => "none",
            ZarrCompression::Lz4 => "lz4",
            ZarrCompression::Zstd => "zstd",
            ZarrCompression::BloscLz4 => "blosc_lz4",
            ZarrCompression::BloscZstd => "blosc_zstd",
        }
    }
}

impl FromStr for ZarrCompression {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(ZarrCompression::None),
            "LZ4" => Ok(ZarrCompression::Lz4),
            "ZSTD" => Ok(ZarrCompression::Zstd),
            "BLOSC_LZ4" => Ok(ZarrCompression::BloscLz4),
            "BLOSC_ZSTD" => Ok(ZarrCompression::BloscZstd),
            // Raster-format codecs without a Zarr equivalent.
            "LZW" | "DEFLATE" => Ok(ZarrCompression::BloscZstd),
            other => Err(MosaicError::configuration(format!(
                "unsupported COMPRESS value: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ZarrCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creation options understood by the Zarr output driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZarrCodecOptions {
    pub compression: ZarrCompression,
    pub level: u8,
    pub shuffle: bool,
}

impl Default for ZarrCodecOptions {
    fn default() -> Self {
        Self {
            compression: ZarrCompression::default(),
            level: 5,
            shuffle: true,
        }
    }
}

impl ZarrCodecOptions {
    const KNOWN_KEYS: [&'static str; 6] = [
        "COMPRESS",
        "LEVEL",
        "SHUFFLE",
        "TILED",
        "BLOCKXSIZE",
        "BLOCKYSIZE",
    ];

    /// Interpret `COMPRESS`, `LEVEL` and `SHUFFLE`. Other keys are kept by
    /// the caller in the array attributes; unknown ones are logged.
    pub fn from_creation_options(options: &CreationOptions) -> Result<Self> {
        let mut parsed = Self::default();

        if let Some(v) = options.get("COMPRESS") {
            parsed.compression = v.parse()?;
        }
        if let Some(v) = options.get("LEVEL") {
            parsed.level = v
                .parse::<u8>()
                .ok()
                .filter(|l| *l <= 9)
                .ok_or_else(|| MosaicError::configuration(format!("invalid LEVEL: {}", v)))?;
        }
        if let Some(v) = options.get("SHUFFLE") {
            parsed.shuffle = parse_flag(v)
                .ok_or_else(|| MosaicError::configuration(format!("invalid SHUFFLE: {}", v)))?;
        }

        for (key, value) in options.pairs() {
            if !Self::KNOWN_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                warn!(key, value, "Ignoring unknown creation option");
            }
        }

        Ok(parsed)
    }

    /// Build the bytes-to-bytes codec, or `None` for uncompressed output.
    pub fn codec(&self, pixel_type: PixelType) -> Result<Option<Arc<dyn BytesToBytesCodecTraits>>> {
        let compressor = match self.compression {
            ZarrCompression::None => return Ok(None),
            ZarrCompression::Lz4 | ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::Zstd | ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let level = BloscCompressionLevel::try_from(self.level)
            .map_err(|_| MosaicError::configuration("invalid compression level"))?;

        let (shuffle, typesize) = if self.shuffle {
            (BloscShuffleMode::Shuffle, Some(pixel_type.size_bytes()))
        } else {
            (BloscShuffleMode::NoShuffle, None)
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| MosaicError::configuration(e.to_string()))?;

        Ok(Some(Arc::new(codec)))
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_uppercase().as_str() {
        "YES" | "TRUE" | "ON" | "1" => Some(true),
        "NO" | "FALSE" | "OFF" | "0" => Some(false),
        _ => None,
    }
}

pub(crate) fn pixel_type_of(data_type: &DataType) -> Option<PixelType> {
    match data_type {
        DataType::UInt8 => Some(PixelType::UInt8),
        DataType::Int16 => Some(PixelType::Int16),
        DataType::UInt16 => Some(PixelType::UInt16),
        DataType::Int32 => Some(PixelType::Int32),
        DataType::UInt32 => Some(PixelType::UInt32),
        DataType::Float32 => Some(PixelType::Float32),
        DataType::Float64 => Some(PixelType::Float64),
        _ => None,
    }
}

pub(crate) fn data_type_of(pixel_type: PixelType) -> DataType {
    match pixel_type {
        PixelType::UInt8 => DataType::UInt8,
        PixelType::Int16 => DataType::Int16,
        PixelType::UInt16 => DataType::UInt16,
        PixelType::Int32 => DataType::Int32,
        PixelType::UInt32 => DataType::UInt32,
        PixelType::Float32 => DataType::Float32,
        PixelType::Float64 => DataType::Float64,
    }
}

/// Encode a nodata value as a JSON attribute.
pub(crate) fn nodata_to_json(nodata: Option<f64>) -> serde_json::Value {
    match nodata {
        None => serde_json::Value::Null,
        Some(v) if v.is_nan() => serde_json::json!("NaN"),
        Some(v) => serde_json::json!(v),
    }
}

/// Decode a nodata attribute. `Err` on anything other than a number,
/// `"NaN"` or null.
pub(crate) fn nodata_from_json(value: Option<&serde_json::Value>) -> std::result::Result<Option<f64>, String> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("nodata {} is not representable", n)),
        Some(serde_json::Value::String(s)) if s.eq_ignore_ascii_case("nan") => Ok(Some(f64::NAN)),
        Some(other) => Err(format!("invalid nodata attribute: {}", other)),
    }
}
