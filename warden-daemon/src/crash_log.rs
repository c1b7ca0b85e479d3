//! Append-only crash reports written beside a pid-file.

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;

use crate::error::{io_err, DaemonError};

/// Append a timestamp, `error` and its source chain to `path`. Never truncates.
pub fn append(path: &Path, error: &(dyn Error + 'static)) -> Result<(), DaemonError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(render(error).as_bytes())
        .map_err(|e| io_err(path, e))
}

fn render(error: &(dyn Error + 'static)) -> String {
    let mut report = format!("{}\n{error}\n", Local::now().to_rfc3339());
    let mut source = error.source();
    while let Some(cause) = source {
        report.push_str(&format!("  caused by: {cause}\n"));
        source = cause.source();
    }
    report
}
