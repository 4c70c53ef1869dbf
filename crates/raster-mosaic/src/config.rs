//! Configuration for a merge job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, Result};
use crate::types::PixelType;

/// Configuration for one merge job. Immutable once the scheduler owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeJob {
    /// Rule used to combine overlapping pixels.
    pub method: AggregationMethod,

    /// Maximum tile edge in output pixels.
    pub block_size: usize,

    /// Number of tiles computed concurrently.
    pub worker_count: usize,

    /// Output pixel type; `None` keeps the first source's type.
    pub pixel_type: Option<PixelType>,

    /// Output nodata value; `None` keeps the first source's value.
    pub nodata: Option<f64>,

    /// Output CRS override.
    pub crs: Option<String>,

    /// Driver-specific `KEY=VALUE` options passed to the output writer.
    pub creation_options: CreationOptions,

    /// Completed tile writes between durability checkpoints.
    pub flush_interval: usize,

    /// Kernel used by the reader when source and output grids differ.
    pub resampling: ResampleMethod,

    /// Memory budget for the reader's decoded block cache in megabytes.
    pub cache_size_mb: usize,
}

impl Default for MergeJob {
    fn default() -> Self {
        Self {
            method: AggregationMethod::Mean,
            block_size: 512,
            worker_count: 4,
            pixel_type: Some(PixelType::Float32),
            nodata: None,
            crs: None,
            creation_options: CreationOptions::default(),
            flush_interval: 100,
            resampling: ResampleMethod::Nearest,
            cache_size_mb: 64,
        }
    }
}

impl MergeJob {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        let mut job = Self::default();
        job.apply_env()?;
        Ok(job)
    }

    /// Overlay `MOSAIC_*` environment variables onto this job.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("MOSAIC_METHOD") {
            self.method = val.parse()?;
        }

        if let Ok(val) = std::env::var("MOSAIC_BLOCK_SIZE") {
            self.block_size = parse_env("MOSAIC_BLOCK_SIZE", &val)?;
        }

        if let Ok(val) = std::env::var("MOSAIC_WORKERS") {
            self.worker_count = parse_env("MOSAIC_WORKERS", &val)?;
        }

        if let Ok(val) = std::env::var("MOSAIC_DTYPE") {
            self.pixel_type = Some(val.parse()?);
        }

        if let Ok(val) = std::env::var("MOSAIC_NODATA") {
            self.nodata = Some(parse_env("MOSAIC_NODATA", &val)?);
        }

        if let Ok(val) = std::env::var("MOSAIC_CRS") {
            if !val.trim().is_empty() && !val.eq_ignore_ascii_case("none") {
                self.crs = Some(val);
            }
        }

        if let Ok(val) = std::env::var("MOSAIC_FLUSH_INTERVAL") {
            self.flush_interval = parse_env("MOSAIC_FLUSH_INTERVAL", &val)?;
        }

        if let Ok(val) = std::env::var("MOSAIC_RESAMPLE") {
            self.resampling = val.parse()?;
        }

        if let Ok(val) = std::env::var("MOSAIC_CREATION_OPTIONS") {
            self.creation_options = CreationOptions::parse_list(&val);
        }

        if let Ok(val) = std::env::var("MOSAIC_CACHE_MB") {
            self.cache_size_mb = parse_env("MOSAIC_CACHE_MB", &val)?;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(MosaicError::configuration("block_size must be > 0"));
        }

        if self.worker_count == 0 {
            return Err(MosaicError::configuration("worker_count must be > 0"));
        }

        if self.flush_interval == 0 {
            return Err(MosaicError::configuration("flush_interval must be > 0"));
        }

        if self.cache_size_mb == 0 {
            return Err(MosaicError::configuration("cache_size_mb must be > 0"));
        }

        Ok(())
    }

    /// Get the reader cache budget in bytes.
    pub fn cache_size_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}

fn parse_env<T: FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| MosaicError::configuration(format!("invalid value '{}' for {}", val, key)))
}

/// Per-pixel rule that combines overlapping source values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggregationMethod {
    /// Arithmetic mean of valid contributors.
    #[default]
    Mean,
    Max,
    Min,
    Sum,
    /// Value of the first candidate (by submission order) with valid data.
    First,
    /// Value of the last candidate (by submission order) with valid data.
    Last,
}

impl AggregationMethod {
    pub const ALL: [AggregationMethod; 6] = [
        Self::Mean,
        Self::Max,
        Self::Min,
        Self::Sum,
        Self::First,
        Self::Last,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::First => "first",
            Self::Last => "last",
        }
    }
}

impl FromStr for AggregationMethod {
    type Err = MosaicError;

    /// Parse from string (case-insensitive); unknown names are rejected.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "average" => Ok(Self::Mean),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "sum" => Ok(Self::Sum),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(MosaicError::configuration(format!(
                "unsupported aggregation method '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for AggregationMethod {
    type Error = MosaicError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AggregationMethod> for String {
    fn from(method: AggregationMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resampling kernel used when a source's grid differs from the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// Nearest source pixel (preserves exact values).
    #[default]
    Nearest,
    /// Bilinear interpolation of the four surrounding source pixels.
    Bilinear,
}

impl FromStr for ResampleMethod {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            other => Err(MosaicError::configuration(format!(
                "unsupported resampling method '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
        }
    }
}

/// Ordered `KEY=VALUE` options handed to the output driver verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreationOptions(Vec<String>);

impl Default for CreationOptions {
    fn default() -> Self {
        Self(vec!["COMPRESS=LZW".to_string(), "TILED=YES".to_string()])
    }
}

impl CreationOptions {
    pub fn new(options: Vec<String>) -> Self {
        Self(options)
    }

    /// Parse a comma-separated option list, dropping blank entries.
    pub fn parse_list(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Append an option unless an identical one is already present.
    pub fn push(&mut self, option: impl Into<String>) {
        let option = option.into();
        if !self.0.contains(&option) {
            self.0.push(option);
        }
    }

    /// Look up a value by key (case-insensitive). The last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
            .last()
    }

    /// Iterate over well-formed `KEY=VALUE` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|opt| {
            let (k, v) = opt.split_once('=')?;
            Some((k.trim(), v.trim()))
        })
    }

    /// The raw option strings.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
