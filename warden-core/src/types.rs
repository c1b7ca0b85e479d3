//! Domain types shared by the daemon runtime and the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// The name a managed program is known by; pid-file names derive from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppName(pub String);

impl AppName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the monitor that supervises instances of this program.
    pub fn monitor(&self) -> AppName {
        AppName(format!("{}_monitor", self.0))
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AppName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Where pid-files live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DirMode {
    /// `dir` is interpreted relative to the directory containing the script.
    #[default]
    Script,
    /// `dir` is interpreted relative to the current working directory.
    Normal,
    /// The fixed system run directory; `dir` is ignored.
    System,
}

impl fmt::Display for DirMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirMode::Script => "script",
            DirMode::Normal => "normal",
            DirMode::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for DirMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "script" => Ok(DirMode::Script),
            "normal" => Ok(DirMode::Normal),
            "system" => Ok(DirMode::System),
            other => Err(ConfigError::UnsupportedDirMode(other.to_owned())),
        }
    }
}
