//! Daemonization, instance lifecycle and supervision.
//!
//! [`Controller`] is the entry point: it builds an [`ApplicationGroup`] from
//! an [`AppContext`], discovers existing instances and dispatches a
//! [`Command`]. A group's [`Monitor`] restarts instances that die.

pub mod application;
pub mod controller;
pub mod crash_log;
pub mod daemonize;
mod error;
pub mod group;
pub mod log_rotation;
pub mod monitor;
pub mod paths;
pub mod signals;

pub use application::{AppContext, Application, ExitReason, ProcError, ProcFn, Status, Target};
pub use controller::{run_proc, Command, Controller};
pub use daemonize::daemonize;
pub use error::DaemonError;
pub use group::ApplicationGroup;
pub use monitor::{watch, Monitor, Supervised};

/// Install the global `tracing` subscriber.
///
/// Writes to stderr. Filtering follows `RUST_LOG` (default `info`). `WARDEN_LOG_FORMAT=json`
/// switches to one JSON object per line. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("WARDEN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init()
    };
}
