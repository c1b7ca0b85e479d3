//! Controller options, optionally loaded from a YAML file.
//!
//! ```yaml
//! dir_mode: normal
//! dir: tmp/pids
//! multiple: false
//! log_output: true
//! monitor: true
//! monitor_intervals:
//!   settle_secs: 30
//!   per_app_secs: 10
//!   recovery_secs: 10
//!   pass_secs: 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::DirMode;

/// Everything the controller passes down to groups, applications and monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub dir_mode: DirMode,
    pub dir: PathBuf,
    /// Allow more than one instance of the program at a time.
    pub multiple: bool,
    /// Stay in the foreground; the pid-file is still written.
    pub ontop: bool,
    /// Append a crash report to `<name>.log` when a daemonized in-process body fails.
    pub backtrace: bool,
    /// Redirect daemon stdout/stderr to `<name>.output` instead of the null device.
    pub log_output: bool,
    /// Launch a monitor that restarts dead instances.
    pub monitor: bool,
    /// Clear stale pid-files instead of refusing to start or stop.
    pub force: bool,
    pub monitor_intervals: WatchIntervals,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_mode: DirMode::Script,
            dir: PathBuf::new(),
            multiple: false,
            ontop: false,
            backtrace: false,
            log_output: false,
            monitor: false,
            force: false,
            monitor_intervals: WatchIntervals::default(),
        }
    }
}

impl Options {
    /// Load options from a YAML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Sleep granularities of the monitor's watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchIntervals {
    /// Initial wait so freshly started applications can come up.
    pub settle_secs: u64,
    /// Pause before checking each application.
    pub per_app_secs: u64,
    /// Pause after relaunching a dead application.
    pub recovery_secs: u64,
    /// Pause after a full pass over all applications.
    pub pass_secs: u64,
}

impl Default for WatchIntervals {
    fn default() -> Self {
        Self {
            settle_secs: 30,
            per_app_secs: 10,
            recovery_secs: 10,
            pass_secs: 30,
        }
    }
}

impl WatchIntervals {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn per_app(&self) -> Duration {
        Duration::from_secs(self.per_app_secs)
    }

    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_secs)
    }

    pub fn pass(&self) -> Duration {
        Duration::from_secs(self.pass_secs)
    }
}
