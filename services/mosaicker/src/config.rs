//! Job configuration for the mosaicker binary.
//!
//! Settings are layered, highest precedence first:
//! command-line flags, the YAML file given with `--config`, `MOSAIC_*`
//! environment variables, then [`MergeJob::default`].
//!
//! The YAML file may reference environment variables with `${VAR}` or
//! `${VAR:-default}`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use raster_mosaic::{AggregationMethod, CreationOptions, MergeJob, PixelType, ResampleMethod};
use serde::Deserialize;

/// Contents of a YAML configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub method: Option<AggregationMethod>,
    pub block_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub pixel_type: Option<PixelType>,
    pub nodata: Option<f64>,
    pub crs: Option<String>,
    pub creation_options: Option<CreationOptions>,
    pub flush_interval: Option<usize>,
    pub resampling: Option<ResampleMethod>,
    pub cache_size_mb: Option<usize>,

    /// Directory scanned for inputs when none are given on the command line.
    pub input_dir: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub recursive: Option<bool>,
}

/// Job settings taken from command-line flags.
#[derive(Debug, Clone, Default)]
pub struct JobOverrides {
    pub method: Option<AggregationMethod>,
    pub block_size: Option<usize>,
    pub worker_count: Option<usize>,
    pub pixel_type: Option<PixelType>,
    pub nodata: Option<f64>,
    pub crs: Option<String>,
    pub creation_options: Vec<String>,
    pub flush_interval: Option<usize>,
    pub resampling: Option<ResampleMethod>,
    pub cache_size_mb: Option<usize>,
}

/// Load and parse a YAML configuration file.
pub fn load_file_config<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_file_config(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// Parse YAML configuration text after environment substitution.
pub fn parse_file_config(content: &str) -> Result<FileConfig> {
    let expanded = expand_env_vars(content)?;
    if expanded.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&expanded).context("Failed to parse YAML")
}

/// Build the job: defaults, then environment, then `file`, then `cli`.
pub fn resolve_job(file: Option<&FileConfig>, cli: &JobOverrides) -> Result<MergeJob> {
    let mut job = MergeJob::from_env().context("Invalid MOSAIC_* environment variable")?;

    if let Some(file) = file {
        apply(&mut job, file.clone().into_overrides());
    }
    apply(&mut job, cli.clone());

    job.validate()?;
    Ok(job)
}

impl FileConfig {
    fn into_overrides(self) -> JobOverrides {
        JobOverrides {
            method: self.method,
            block_size: self.block_size,
            worker_count: self.worker_count,
            pixel_type: self.pixel_type,
            nodata: self.nodata,
            crs: self.crs,
            creation_options: self
                .creation_options
                .map(|co| co.as_slice().to_vec())
                .unwrap_or_default(),
            flush_interval: self.flush_interval,
            resampling: self.resampling,
            cache_size_mb: self.cache_size_mb,
        }
    }
}

fn apply(job: &mut MergeJob, overrides: JobOverrides) {
    if let Some(method) = overrides.method {
        job.method = method;
    }
    if let Some(block_size) = overrides.block_size {
        job.block_size = block_size;
    }
    if let Some(workers) = overrides.worker_count {
        job.worker_count = workers;
    }
    if let Some(pixel_type) = overrides.pixel_type {
        job.pixel_type = Some(pixel_type);
    }
    if let Some(nodata) = overrides.nodata {
        job.nodata = Some(nodata);
    }
    if let Some(crs) = overrides.crs.filter(|c| !c.trim().is_empty()) {
        job.crs = Some(crs);
    }
    if !overrides.creation_options.is_empty() {
        job.creation_options = CreationOptions::new(overrides.creation_options);
    }
    if let Some(interval) = overrides.flush_interval {
        job.flush_interval = interval;
    }
    if let Some(resampling) = overrides.resampling {
        job.resampling = resampling;
    }
    if let Some(cache) = overrides.cache_size_mb {
        job.cache_size_mb = cache;
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{}", after))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((name, default)) = expr.split_once(":-") {
        match std::env::var(name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim())
            .with_context(|| format!("Environment variable {} not set", expr.trim()))
    }
}
