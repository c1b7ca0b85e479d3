//! Command dispatch over one application group.

use std::fmt;

use warden_core::{AppName, Options};

use crate::application::{AppContext, Target};
use crate::error::DaemonError;
use crate::group::ApplicationGroup;
use crate::paths::RESTART_PAUSE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Run,
    Zap,
    Status,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::Run => "run",
            Command::Zap => "zap",
            Command::Status => "status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Controller {
    group: ApplicationGroup,
}

impl Controller {
    /// Build the group for `ctx` and discover its existing instances.
    pub fn new(ctx: AppContext) -> Result<Self, DaemonError> {
        let mut group = ApplicationGroup::new(ctx);
        group.setup()?;
        Ok(Self { group })
    }

    pub fn group(&self) -> &ApplicationGroup {
        &self.group
    }

    /// Execute `command`.
    ///
    /// `start` without `ontop` daemonizes: the calling process exits inside
    /// this call and only the daemon continues.
    pub fn run(&mut self, command: Command) -> Result<(), DaemonError> {
        tracing::debug!(app = %self.group.name(), %command, "dispatching");
        let monitor = self.group.context().options.monitor;

        match command {
            Command::Start => {
                let app = self.group.new_application()?;
                if monitor {
                    self.group.create_monitor()?;
                }
                app.start()
            }
            Command::Run => self.group.new_application()?.run(),
            Command::Stop => self.group.stop_all(),
            Command::Restart => {
                if self.group.applications().is_empty() {
                    tracing::info!(app = %self.group.name(), "no instances to restart");
                    return Ok(());
                }
                self.group.stop_all()?;
                std::thread::sleep(RESTART_PAUSE);
                self.group.start_all()?;
                if monitor {
                    self.group.create_monitor()?;
                }
                Ok(())
            }
            Command::Zap => self.group.zap_all(),
            Command::Status => {
                if self.group.applications().is_empty() {
                    println!("{}: no instances running", self.group.name());
                } else {
                    self.group.show_status_all();
                }
                Ok(())
            }
        }
    }
}

/// Manage a closure as if it were a program called `name`.
pub fn run_proc<F>(
    name: impl Into<AppName>,
    options: Options,
    command: Command,
    body: F,
) -> Result<(), DaemonError>
where
    F: Fn(&[String]) -> Result<(), crate::application::ProcError> + Send + Sync + 'static,
{
    let ctx = AppContext::new(name, Target::proc(body), options);
    Controller::new(ctx)?.run(command)
}
