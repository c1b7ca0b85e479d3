//! Liveness checks against the OS process table.
//!
//! Uses a full `ps ax` listing rather than `kill(pid, 0)`: signal probing
//! reports `EPERM` for other users' processes and succeeds for zombies.

use std::process::Command;

use crate::error::PidError;

/// Run `ps ax` and return its stdout.
pub fn process_listing() -> Result<String, PidError> {
    let output = Command::new("ps")
        .arg("ax")
        .output()
        .map_err(|e| PidError::Listing(format!("failed to run ps: {e}")))?;
    if !output.status.success() {
        return Err(PidError::Listing(format!(
            "ps exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `listing` shows a live process with id `pid`.
///
/// The pid must be the first column of a line, so pid 12 never matches a line
/// for 123. The first matching line decides: a `Z` state means the process is
/// defunct, and a `name_hint` must appear somewhere on the line.
pub fn listing_contains(listing: &str, pid: u32, name_hint: Option<&str>) -> bool {
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        let matches_pid = fields
            .next()
            .and_then(|field| field.parse::<u32>().ok())
            .is_some_and(|found| found == pid);
        if !matches_pid {
            continue;
        }

        // columns: PID TTY STAT TIME COMMAND
        if fields.nth(1).is_some_and(|stat| stat.starts_with('Z')) {
            return false;
        }
        return name_hint.map_or(true, |hint| line.contains(hint));
    }
    false
}

/// Query the process table for `pid`. A missing process is `Ok(false)`; only
/// an unusable `ps` is an error.
pub fn is_running(pid: u32, name_hint: Option<&str>) -> Result<bool, PidError> {
    let listing = process_listing()?;
    Ok(listing_contains(&listing, pid, name_hint))
}
