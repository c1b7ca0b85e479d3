//! Size-based rotation of a daemon's `<name>.output` file.
//!
//! Runs right before a daemon reopens its output log. Keeps at most 5 backups:
//!   app.output → app.output.1 → app.output.2 → … → app.output.5

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Output log size that triggers rotation (10 MiB).
pub const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated backups kept.
pub const MAX_BACKUPS: usize = 5;

/// Rotate `log_path` when it is at least `max_bytes` long.
///
/// Returns `true` if rotation occurred. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, backups: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || backups == 0 {
        return Ok(false);
    }

    match fs::remove_file(backup_path(log_path, backups)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..backups).rev() {
        let from = backup_path(log_path, n);
        if from.exists() {
            fs::rename(&from, backup_path(log_path, n + 1))?;
        }
    }
    // the daemon reopens in append mode, so no fresh file is needed
    fs::rename(log_path, backup_path(log_path, 1))?;
    Ok(true)
}

/// Rotate an output log with the default limits, logging instead of failing.
pub fn rotate_output_log(log_path: &Path) {
    match rotate_if_needed(log_path, MAX_OUTPUT_BYTES, MAX_BACKUPS) {
        Ok(true) => tracing::info!(path = %log_path.display(), "output log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "output log rotation failed")
        }
    }
}

/// `<log>.<n>`
fn backup_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
