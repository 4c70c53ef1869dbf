//! Raster mosaicker.
//!
//! Merges many partially overlapping rasters into one Zarr output,
//! resolving overlaps with a per-pixel aggregation method.

mod config;
mod discovery;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use raster_mosaic::{
    AggregationMethod, MergeObserver, MergeOutcome, MosaicService, PixelType, ResampleMethod,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{FileConfig, JobOverrides};

/// Exit status after an interrupt, as a shell reports SIGINT.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "mosaicker")]
#[command(about = "Merge overlapping georeferenced rasters into one Zarr mosaic")]
struct Args {
    /// Input rasters; merged in the order given
    inputs: Vec<PathBuf>,

    /// Output Zarr array
    #[arg(short, long)]
    output: PathBuf,

    /// Scan this directory for inputs instead of listing them
    #[arg(short, long, conflicts_with = "inputs")]
    input_dir: Option<PathBuf>,

    /// Extensions matched by --input-dir (comma separated)
    #[arg(long, value_delimiter = ',')]
    ext: Vec<String>,

    /// Descend into subdirectories of --input-dir
    #[arg(short, long)]
    recursive: bool,

    /// Aggregation method: mean, max, min, sum, first, last
    #[arg(short, long)]
    method: Option<AggregationMethod>,

    /// Tile edge in output pixels
    #[arg(long)]
    block_size: Option<usize>,

    /// Tiles computed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output pixel type (uint8, int16, uint16, int32, uint32, float32, float64)
    #[arg(long)]
    dtype: Option<PixelType>,

    /// Output nodata value
    #[arg(long, allow_hyphen_values = true)]
    nodata: Option<f64>,

    /// Output CRS, overriding the sources'
    #[arg(long)]
    crs: Option<String>,

    /// Creation option KEY=VALUE (repeatable)
    #[arg(long = "co")]
    creation_options: Vec<String>,

    /// Tile writes between checkpoints
    #[arg(long)]
    flush_interval: Option<usize>,

    /// Resampling kernel: nearest, bilinear
    #[arg(long)]
    resample: Option<ResampleMethod>,

    /// Reader block cache size in megabytes
    #[arg(long)]
    cache_mb: Option<usize>,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn overrides(&self) -> JobOverrides {
        JobOverrides {
            method: self.method,
            block_size: self.block_size,
            worker_count: self.workers,
            pixel_type: self.dtype,
            nodata: self.nodata,
            crs: self.crs.clone(),
            creation_options: self.creation_options.clone(),
            flush_interval: self.flush_interval,
            resampling: self.resample,
            cache_size_mb: self.cache_mb,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.log_level.as_deref(), args.log_json) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(MergeOutcome::Completed(_)) => ExitCode::SUCCESS,
        Ok(MergeOutcome::Cancelled(_)) => ExitCode::from(EXIT_CANCELLED),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Mosaic failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>, json: bool) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("Invalid log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run(args: Args) -> Result<MergeOutcome> {
    let file = args
        .config
        .as_deref()
        .map(config::load_file_config)
        .transpose()?;
    let job = config::resolve_job(file.as_ref(), &args.overrides())?;
    let inputs = collect_inputs(&args, file.as_ref())?;

    info!(
        inputs = inputs.len(),
        output = %args.output.display(),
        method = %job.method,
        block_size = job.block_size,
        workers = job.worker_count,
        "Starting mosaicker"
    );

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let service = MosaicService::new(job)?.with_observer(Arc::new(ProgressLogger::default()));
    let outcome = service.merge(&inputs, &args.output, cancel).await?;

    let summary = outcome.summary();
    match &outcome {
        MergeOutcome::Completed(_) => info!(
            tiles = summary.tiles_written,
            skipped_reads = summary.skipped_reads,
            bytes = summary.bytes_written,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Mosaic written"
        ),
        MergeOutcome::Cancelled(_) => warn!(
            written = summary.tiles_written,
            total = summary.tiles_total,
            "Mosaic interrupted; output is partial"
        ),
    }

    Ok(outcome)
}

/// Explicit inputs win; otherwise scan the directory from the flags or the file.
fn collect_inputs(args: &Args, file: Option<&FileConfig>) -> Result<Vec<PathBuf>> {
    if !args.inputs.is_empty() {
        return Ok(args.inputs.clone());
    }

    let dir = args
        .input_dir
        .clone()
        .or_else(|| file.and_then(|f| f.input_dir.clone()));
    let Some(dir) = dir else {
        bail!("No inputs given; pass input paths or --input-dir");
    };

    let extensions = if !args.ext.is_empty() {
        args.ext.clone()
    } else {
        file.and_then(|f| f.extensions.clone())
            .unwrap_or_else(|| vec![".zarr".to_string()])
    };
    let recursive = args.recursive || file.and_then(|f| f.recursive).unwrap_or(false);

    discovery::discover_inputs(&dir, &extensions, recursive)
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after in-flight tiles");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
    });
}

/// Logs progress at every tenth percent.
#[derive(Default)]
struct ProgressLogger {
    last_decile: std::sync::atomic::AtomicU8,
}

impl MergeObserver for ProgressLogger {
    fn log(&self, message: &str) {
        info!("{}", message);
    }

    fn error(&self, message: &str) {
        warn!("{}", message);
    }

    fn progress(&self, percent: u8) {
        use std::sync::atomic::Ordering;

        let decile = percent / 10;
        if decile > self.last_decile.fetch_max(decile, Ordering::Relaxed) {
            info!(percent, "Progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_flags() {
        let args = Args::try_parse_from([
            "mosaicker",
            "-o",
            "out.zarr",
            "--method",
            "max",
            "--nodata",
            "-9999",
            "--co",
            "COMPRESS=ZSTD",
            "--co",
            "LEVEL=3",
            "a.zarr",
            "b.zarr",
        ])
        .unwrap();

        assert_eq!(args.inputs, vec![PathBuf::from("a.zarr"), PathBuf::from("b.zarr")]);
        assert_eq!(args.method, Some(AggregationMethod::Max));
        assert_eq!(args.nodata, Some(-9999.0));
        assert_eq!(args.creation_options, vec!["COMPRESS=ZSTD", "LEVEL=3"]);
    }

    #[test]
    fn test_args_reject_unknown_method() {
        assert!(Args::try_parse_from(["mosaicker", "-o", "o.zarr", "-m", "median", "a.zarr"]).is_err());
    }

    #[test]
    fn test_args_input_dir_conflicts_with_inputs() {
        assert!(Args::try_parse_from(["mosaicker", "-o", "o.zarr", "-i", "dir", "a.zarr"]).is_err());
    }

    #[test]
    fn test_collect_inputs_requires_a_source() {
        let args = Args::try_parse_from(["mosaicker", "-o", "o.zarr"]).unwrap();
        assert!(collect_inputs(&args, None).is_err());
    }

    #[test]
    fn test_collect_inputs_uses_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("x.tif")).unwrap();
        std::fs::create_dir_all(dir.path().join("y.zarr")).unwrap();

        let file = FileConfig {
            input_dir: Some(dir.path().to_path_buf()),
            extensions: Some(vec!["tif".to_string()]),
            ..Default::default()
        };
        let args = Args::try_parse_from(["mosaicker", "-o", "o.zarr"]).unwrap();
        let inputs = collect_inputs(&args, Some(&file)).unwrap();
        assert_eq!(inputs, vec![dir.path().join("x.tif")]);
    }

    #[test]
    fn test_progress_logger_tracks_deciles() {
        let logger = ProgressLogger::default();
        logger.progress(5);
        logger.progress(25);
        logger.progress(21);
        assert_eq!(
            logger.last_decile.load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }
}
