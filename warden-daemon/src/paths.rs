use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable carrying the controller arguments into an exec'd script.
pub const ARGV_ENV: &str = "WARDEN_ARGV";

/// Pause between stopping and starting again on `restart`.
pub const RESTART_PAUSE: Duration = Duration::from_secs(1);

/// Working directory of every daemon, so it never pins a removable mount.
pub const DAEMON_WORKDIR: &str = "/";

pub const NULL_DEVICE: &str = "/dev/null";

/// `<dir>/<name>.output`: daemon stdout/stderr when output logging is on.
pub fn output_log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.output"))
}

/// `<dir>/<name>.log`: crash reports.
pub fn crash_log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.log"))
}
