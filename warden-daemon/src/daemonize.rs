//! Double-fork detach from the controlling terminal and session.

use std::fs::{self, File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{chdir, dup2, fork, setsid, ForkResult};

use crate::error::{io_err, DaemonError};
use crate::paths::{DAEMON_WORKDIR, NULL_DEVICE};

/// Turn the calling process into a daemon.
///
/// The caller's process exits inside this function; what returns is a
/// grandchild with a new pid, no controlling terminal, cwd `/`, umask `0`,
/// stdin on the null device and stdout/stderr appended to `log_output` (or
/// the null device).
///
/// Errors are fatal to the sequence: the caller must not write a pid-file
/// after a failure.
pub fn daemonize(log_output: Option<&Path>) -> Result<(), DaemonError> {
    detach_parent("first fork")?;

    setsid().map_err(|source| DaemonError::Daemonize {
        step: "setsid",
        source,
    })?;

    // SAFETY: installs SIG_IGN, no handler code runs.
    unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) }.map_err(|source| {
        DaemonError::Daemonize {
            step: "ignore SIGHUP",
            source,
        }
    })?;

    // The session leader exits, so the daemon can never reacquire a terminal.
    detach_parent("second fork")?;

    // SAFETY: restores the default disposition, no handler code runs.
    unsafe { signal(Signal::SIGHUP, SigHandler::SigDfl) }.map_err(|source| {
        DaemonError::Daemonize {
            step: "restore SIGHUP",
            source,
        }
    })?;

    chdir(DAEMON_WORKDIR).map_err(|source| DaemonError::Daemonize {
        step: "chdir",
        source,
    })?;
    umask(Mode::empty());

    redirect_std_streams(log_output)?;
    tracing::debug!(pid = std::process::id(), "daemonized");
    Ok(())
}

/// Fork; the parent exits immediately and the child returns.
fn detach_parent(step: &'static str) -> Result<(), DaemonError> {
    // SAFETY: the child only continues the daemonize sequence on this thread.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => Ok(()),
        Err(source) => Err(DaemonError::Daemonize { step, source }),
    }
}

fn redirect_std_streams(log_output: Option<&Path>) -> Result<(), DaemonError> {
    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open(NULL_DEVICE)
        .map_err(|e| io_err(NULL_DEVICE, e))?;

    let output = match log_output {
        Some(path) => open_output_log(path)?,
        None => null.try_clone().map_err(|e| io_err(NULL_DEVICE, e))?,
    };

    for (from, to, step) in [
        (&null, STDIN_FILENO, "redirect stdin"),
        (&output, STDOUT_FILENO, "redirect stdout"),
        (&output, STDERR_FILENO, "redirect stderr"),
    ] {
        dup2(from.as_raw_fd(), to).map_err(|source| DaemonError::Daemonize { step, source })?;
    }
    Ok(())
}

fn open_output_log(path: &Path) -> Result<File, DaemonError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}
