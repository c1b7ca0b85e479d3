//! Supervisor that polls a group's instances and relaunches dead ones.
//!
//! A monitor tracks itself through `<name>_monitor.pid` when the group has a
//! pid-file directory; it then runs as its own daemon and survives the
//! controller. Without a directory it runs on a background thread of the
//! current process and is tracked in memory only.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use tokio::time::sleep;
use warden_core::{find_files, process, AppName, PidFile, PidMem, PidStore, WatchIntervals};

use crate::application::{AppContext, Application};
use crate::crash_log;
use crate::daemonize::daemonize;
use crate::error::{io_err, DaemonError};
use crate::paths::crash_log_path;

/// What the watch loop needs from a supervised instance.
pub trait Supervised {
    fn label(&self) -> String;
    fn is_running(&self) -> bool;
    fn zap(&self) -> Result<(), DaemonError>;
    /// Start a fresh instance without blocking the caller.
    fn relaunch(&self) -> Result<(), DaemonError>;
}

impl Supervised for Application {
    fn label(&self) -> String {
        match self.record().path() {
            Some(path) => path.display().to_string(),
            None => self.name().to_string(),
        }
    }

    fn is_running(&self) -> bool {
        Application::is_running(self)
    }

    fn zap(&self) -> Result<(), DaemonError> {
        Application::zap(self)
    }

    fn relaunch(&self) -> Result<(), DaemonError> {
        self.launch_detached()
    }
}

/// Poll `apps` forever, zapping and relaunching every instance found dead.
///
/// Only returns if zapping or relaunching fails.
pub async fn watch<S: Supervised>(
    apps: &[S],
    intervals: &WatchIntervals,
) -> Result<Infallible, DaemonError> {
    sleep(intervals.settle()).await;

    loop {
        for app in apps {
            sleep(intervals.per_app()).await;
            if app.is_running() {
                continue;
            }

            tracing::warn!(app = %app.label(), "instance not running, restarting");
            app.zap()?;
            app.relaunch()?;
            sleep(intervals.recovery()).await;
        }
        sleep(intervals.pass()).await;
    }
}

#[derive(Debug)]
pub struct Monitor {
    name: AppName,
    record: Arc<dyn PidStore>,
    crash_log: Option<PathBuf>,
    intervals: WatchIntervals,
}

impl Monitor {
    /// A monitor for the group described by `ctx`. Nothing is started.
    pub fn new(ctx: &AppContext) -> Result<Self, DaemonError> {
        let name = ctx.name.monitor();
        let (record, crash_log): (Arc<dyn PidStore>, _) = match ctx.pid_dir() {
            Some(dir) => (
                Arc::new(PidFile::new(dir, name.as_str(), false)?),
                Some(crash_log_path(dir, name.as_str())),
            ),
            None => (Arc::new(PidMem::new()), None),
        };
        Ok(Self {
            name,
            record,
            crash_log,
            intervals: ctx.options.monitor_intervals,
        })
    }

    /// The monitor already running for `name` in `dir`, if any.
    ///
    /// A record whose process is gone is removed and reported as no monitor.
    pub fn find(
        dir: &Path,
        name: &AppName,
        intervals: &WatchIntervals,
    ) -> Result<Option<Self>, DaemonError> {
        let name = name.monitor();
        let Some(path) = find_files(dir, name.as_str())?.into_iter().next() else {
            return Ok(None);
        };

        let record = PidFile::existing(&path)?;
        let alive = match record.read() {
            Ok(pid) => process::is_running(pid, None)?,
            Err(_) => false,
        };
        if !alive {
            tracing::info!(path = %path.display(), "removing stale monitor record");
            if let Err(err) = record.remove() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove stale monitor record");
            }
            return Ok(None);
        }

        Ok(Some(Self {
            crash_log: Some(crash_log_path(record.dir(), name.as_str())),
            name,
            record: Arc::new(record),
            intervals: *intervals,
        }))
    }

    pub fn name(&self) -> &AppName {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.record.pid().ok()
    }

    /// Begin supervising `apps`. Does nothing for an empty list.
    pub fn start(&self, apps: Vec<Application>) -> Result<(), DaemonError> {
        if apps.is_empty() {
            return Ok(());
        }
        if self.record.is_file_backed() {
            self.start_daemonized(apps)
        } else {
            self.start_in_process(apps)
        }
    }

    /// Ask the monitor to terminate, then remove its record. Both steps are best effort.
    pub fn stop(&self) {
        if let Ok(pid) = self.record.pid() {
            match crate::signals::send_terminate(pid) {
                Ok(_) => tracing::info!(monitor = %self.name, pid, "monitor stopped"),
                Err(err) => tracing::warn!(monitor = %self.name, pid, error = %err, "failed to signal monitor"),
            }
        }
        if let Err(err) = self.record.cleanup() {
            tracing::debug!(monitor = %self.name, error = %err, "monitor record cleanup failed");
        }
    }

    fn start_daemonized(&self, apps: Vec<Application>) -> Result<(), DaemonError> {
        // SAFETY: the child daemonizes and never returns to the caller's code.
        match unsafe { fork() }.map_err(DaemonError::Fork)? {
            ForkResult::Child => {
                let err = match self.supervise(&apps) {
                    Ok(never) => match never {},
                    Err(err) => err,
                };
                self.fail(&err);
                std::process::exit(1);
            }
            ForkResult::Parent { child } => {
                // the child exits as soon as daemonize forks
                if let Err(err) = waitpid(child, None) {
                    tracing::debug!(pid = child.as_raw(), error = %err, "waitpid failed");
                }
                tracing::info!(monitor = %self.name, apps = apps.len(), "monitor launched");
                Ok(())
            }
        }
    }

    /// Body of the daemonized monitor.
    fn supervise(&self, apps: &[Application]) -> Result<Infallible, DaemonError> {
        daemonize(None)?;
        self.record.set_pid(std::process::id())?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;
        runtime.block_on(watch(apps, &self.intervals))
    }

    /// Record the failure, drop the pid record. The monitor never restarts itself.
    fn fail(&self, err: &DaemonError) {
        tracing::error!(monitor = %self.name, error = %err, "monitor failed");
        if let Some(path) = &self.crash_log {
            if let Err(log_err) = crash_log::append(path, err) {
                tracing::warn!(path = %path.display(), error = %log_err, "failed to write monitor log");
            }
        }
        if let Err(cleanup_err) = self.record.cleanup() {
            tracing::warn!(monitor = %self.name, error = %cleanup_err, "monitor record cleanup failed");
        }
    }

    fn start_in_process(&self, apps: Vec<Application>) -> Result<(), DaemonError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| io_err("tokio-runtime", e))?;
        let intervals = self.intervals;
        let name = self.name.clone();

        std::thread::Builder::new()
            .name("warden-monitor".to_string())
            .spawn(move || {
                let err = match runtime.block_on(watch(&apps, &intervals)) {
                    Ok(never) => match never {},
                    Err(err) => err,
                };
                tracing::error!(monitor = %name, error = %err, "in-process monitor failed");
            })
            .map_err(|e| io_err("warden-monitor thread", e))?;
        tracing::info!(monitor = %self.name, "monitor running in-process");
        Ok(())
    }
}
