//! warden core library: domain types, options, pid records and liveness.
//!
//! - [`types`]: [`AppName`], [`DirMode`]
//! - [`options`]: [`Options`] and YAML loading
//! - [`pidfile`]: directory resolution, discovery, [`PidStore`] with
//!   [`PidFile`] and [`PidMem`]
//! - [`process`]: `ps ax` based liveness

pub mod error;
pub mod options;
pub mod pidfile;
pub mod process;
pub mod types;

pub use error::{ConfigError, PidError};
pub use options::{Options, WatchIntervals};
pub use pidfile::{find_files, resolve_dir, PidFile, PidMem, PidStore};
pub use types::{AppName, DirMode};
