//! All instances of one named program sharing a pid-file directory.

use std::sync::Arc;

use warden_core::{find_files, AppName, PidFile};

use crate::application::{AppContext, Application, Status};
use crate::error::DaemonError;
use crate::monitor::Monitor;

#[derive(Debug)]
pub struct ApplicationGroup {
    ctx: Arc<AppContext>,
    applications: Vec<Application>,
    monitor: Option<Monitor>,
}

impl ApplicationGroup {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            applications: Vec::new(),
            monitor: None,
        }
    }

    pub fn name(&self) -> &AppName {
        &self.ctx.name
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn applications(&self) -> &[Application] {
        &self.applications
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    /// Rebuild one instance per pid-file found on disk, and locate a running
    /// monitor. Without a pid-file directory there is nothing to discover.
    pub fn setup(&mut self) -> Result<(), DaemonError> {
        let Some(dir) = self.ctx.pid_dir() else {
            return Ok(());
        };

        for path in find_files(dir, self.ctx.name.as_str())? {
            match PidFile::existing(&path) {
                Ok(record) => self
                    .applications
                    .push(Application::existing(Arc::clone(&self.ctx), record)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping pid-file")
                }
            }
        }
        self.monitor = Monitor::find(dir, &self.ctx.name, &self.ctx.options.monitor_intervals)?;

        tracing::debug!(
            app = %self.ctx.name,
            instances = self.applications.len(),
            monitor = self.monitor.is_some(),
            "group discovered"
        );
        Ok(())
    }

    /// Register a new instance.
    ///
    /// Without `multiple`, any known instance is a conflict. With `force`,
    /// instances whose process is gone are zapped first and only live ones
    /// conflict.
    pub fn new_application(&mut self) -> Result<Application, DaemonError> {
        let options = &self.ctx.options;
        if !options.multiple && !self.applications.is_empty() {
            if options.force {
                self.prune_dead()?;
            }
            if !self.applications.is_empty() {
                return Err(DaemonError::AlreadyRunning {
                    app: self.ctx.name.to_string(),
                });
            }
        }

        let app = Application::fresh(Arc::clone(&self.ctx))?;
        self.applications.push(app.clone());
        Ok(app)
    }

    fn prune_dead(&mut self) -> Result<(), DaemonError> {
        let (alive, dead): (Vec<_>, Vec<_>) = self
            .applications
            .drain(..)
            .partition(Application::is_running);
        self.applications = alive;

        for app in dead {
            tracing::info!(app = %app.name(), path = ?app.record().path(), "zapping stale instance");
            app.zap()?;
        }
        Ok(())
    }

    /// Replace any running monitor with a fresh one watching every instance.
    pub fn create_monitor(&mut self) -> Result<(), DaemonError> {
        if let Some(existing) = self.monitor.take() {
            existing.stop();
        }
        let monitor = Monitor::new(&self.ctx)?;
        monitor.start(self.applications.clone())?;
        self.monitor = Some(monitor);
        Ok(())
    }

    /// Launch every instance as an independent child.
    ///
    /// A failing launch does not hold up the rest; the first error is returned.
    pub fn start_all(&self) -> Result<(), DaemonError> {
        fan_out(&self.applications, "start", Application::launch_detached)
    }

    /// Stop the monitor first so it cannot resurrect what is being stopped.
    pub fn stop_all(&mut self) -> Result<(), DaemonError> {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        fan_out(&self.applications, "stop", Application::stop)
    }

    pub fn zap_all(&self) -> Result<(), DaemonError> {
        fan_out(&self.applications, "zap", Application::zap)
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.applications.iter().map(Application::status).collect()
    }

    pub fn show_status_all(&self) {
        for app in &self.applications {
            app.show_status();
        }
    }
}

fn fan_out(
    apps: &[Application],
    op: &'static str,
    f: impl Fn(&Application) -> Result<(), DaemonError>,
) -> Result<(), DaemonError> {
    let mut first_err = None;
    for app in apps {
        if let Err(err) = f(app) {
            tracing::error!(app = %app.name(), op, error = %err, "operation failed");
            first_err.get_or_insert(err);
        }
    }
    first_err.map_or(Ok(()), Err)
}
