//! Input discovery.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

/// Find inputs under `dir` whose names end in one of `extensions`.
///
/// Matching is case-insensitive and applies to directories as well as
/// files, since a Zarr array is a directory. Matched directories are not
/// descended into. Results are sorted; an empty result is an error.
pub fn discover_inputs(dir: &Path, extensions: &[String], recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Input directory {} does not exist", dir.display());
    }

    let extensions: Vec<String> = extensions
        .iter()
        .map(|e| normalize_extension(e))
        .filter(|e| e.len() > 1)
        .collect();
    if extensions.is_empty() {
        bail!("No input extensions given");
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();
    let mut walker = WalkDir::new(dir).min_depth(1).max_depth(max_depth).into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            found.push(entry.into_path());
        }
    }

    if found.is_empty() {
        bail!(
            "No inputs matching {} found in {}",
            extensions.join(", "),
            dir.display()
        );
    }

    found.sort();
    Ok(found)
}

/// `tif` and `.TIF` both become `.tif`.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}
