//! SIGTERM: the only control-plane primitive between supervisor and supervisee.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};

use crate::error::{io_err, DaemonError};

/// Send SIGTERM to `pid`. Returns `Ok(false)` when no such process exists.
pub fn send_terminate(pid: u32) -> Result<bool, DaemonError> {
    let raw = i32::try_from(pid).map_err(|_| DaemonError::Signal {
        pid,
        source: Errno::EINVAL,
    })?;
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(DaemonError::Signal { pid, source }),
    }
}

/// Run `on_terminate` on a dedicated thread when this process receives SIGTERM.
///
/// The handler is registered before this function returns, so a SIGTERM that
/// arrives afterwards is never lost to the default disposition.
pub(crate) fn on_terminate<F>(on_terminate: F) -> Result<(), DaemonError>
where
    F: FnOnce() + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    let mut terminate = {
        let _guard = runtime.enter();
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?
    };

    std::thread::Builder::new()
        .name("warden-sigterm".to_string())
        .spawn(move || {
            runtime.block_on(async {
                terminate.recv().await;
            });
            tracing::info!("received SIGTERM");
            on_terminate();
        })
        .map_err(|e| io_err("warden-sigterm thread", e))?;
    Ok(())
}
