//! Error types for warden-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning user-supplied settings into a runnable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A directory mode string that is not one of `script`, `normal`, `system`.
    #[error("pid-file directory mode '{0}' not implemented")]
    UnsupportedDirMode(String),

    /// The config file could not be read.
    #[error("I/O error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load; carries file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Errors from pid-file I/O and process liveness queries.
#[derive(Debug, Error)]
pub enum PidError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not hold a single decimal process id.
    #[error("malformed pid-file {path}: {content:?}")]
    Malformed { path: PathBuf, content: String },

    /// The path does not follow the `<name>.pid` / `<name>_num<N>.pid` convention.
    #[error("not a pid-file name: {path}")]
    NotAPidFile { path: PathBuf },

    #[error("cannot run more than {limit} instances of '{progname}'")]
    TooManyInstances { progname: String, limit: u32 },

    /// An in-memory record was read before any pid was stored.
    #[error("no pid recorded")]
    Missing,

    /// `ps ax` could not be run or exited unsuccessfully.
    #[error("process listing failed: {0}")]
    Listing(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PidError {
    PidError::Io {
        path: path.into(),
        source,
    }
}
