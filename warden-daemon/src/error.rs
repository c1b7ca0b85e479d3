use std::path::PathBuf;

use thiserror::Error;

use crate::application::ProcError;

/// Error surface for daemonization, application lifecycle and supervision.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] warden_core::ConfigError),

    #[error("pid-file error: {0}")]
    Pid(#[from] warden_core::PidError),

    /// One step of the detach sequence failed; the process must not record itself.
    #[error("daemonize: {step} failed: {source}")]
    Daemonize {
        step: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("there is already one or more instance(s) of {app} running")]
    AlreadyRunning { app: String },

    #[error("failed to exec {script}: {source}")]
    Exec {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The in-process body returned an error or panicked.
    #[error("{app} exited with an error: {source}")]
    Proc {
        app: String,
        #[source]
        source: ProcError,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
