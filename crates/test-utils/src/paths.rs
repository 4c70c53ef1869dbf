//! Path utilities for test data and test output.

use std::path::{Path, PathBuf};

/// Creates a temporary directory for test output.
///
/// The directory is removed when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Creates a temporary directory with a specific prefix.
pub fn temp_test_dir_with_prefix(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// `dir/{name}.zarr`
pub fn zarr_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.zarr", name))
}

/// Sorted `.zarr` paths for `names` under `dir`.
pub fn zarr_paths<'a>(dir: &Path, names: impl IntoIterator<Item = &'a str>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = names.into_iter().map(|n| zarr_path(dir, n)).collect();
    paths.sort();
    paths
}

/// Recursively collect every file under `root` with its bytes, sorted by
/// relative path. Two outputs are byte-identical iff their listings are equal.
pub fn snapshot_dir(root: &Path) -> std::io::Result<Vec<(PathBuf, Vec<u8>)>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                files.push((rel, std::fs::read(&path)?));
            }
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_test_dir_with_prefix() {
        let dir = temp_test_dir_with_prefix("mosaic_test_");
        assert!(dir.path().to_string_lossy().contains("mosaic_test_"));
    }

    #[test]
    fn test_zarr_paths_sorted() {
        let dir = Path::new("/data");
        let paths = zarr_paths(dir, ["b", "a"]);
        assert_eq!(paths, vec![PathBuf::from("/data/a.zarr"), PathBuf::from("/data/b.zarr")]);
    }

    #[test]
    fn test_snapshot_dir() {
        let dir = temp_test_dir();
        std::fs::create_dir_all(dir.path().join("c/0")).unwrap();
        std::fs::write(dir.path().join("zarr.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("c/0/0"), b"xy").unwrap();

        let snap = snapshot_dir(dir.path()).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].0, PathBuf::from("c/0/0"));
        assert_eq!(snap[1].1, b"{}".to_vec());
    }
}
