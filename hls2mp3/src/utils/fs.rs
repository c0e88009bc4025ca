//! Filesystem helpers for the artifact directory.

use std::io::ErrorKind;
use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path("creating directory", path, e))
}

/// Check that files can be created in `dir`.
///
/// The probe file is removed again when it goes out of scope.
pub fn probe_writable(dir: &Path) -> Result<()> {
    tempfile::Builder::new()
        .prefix(".hls2mp3-probe")
        .tempfile_in(dir)
        .map(drop)
        .map_err(|e| Error::io_path("writing probe file in", dir, e))
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Blocking variant of [`remove_file`], for use in `Drop`.
pub fn remove_file_sync(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
