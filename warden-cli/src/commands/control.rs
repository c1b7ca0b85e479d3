//! `warden start|stop|restart|run|zap|status <script>`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use warden_core::{DirMode, Options};
use warden_daemon::{AppContext, Command, Controller, Target};

/// Arguments shared by every control command.
#[derive(Args, Debug)]
pub struct ControlArgs {
    /// Executable to manage. Its file name is the application name.
    pub script: PathBuf,

    /// Use this application name instead of the script's file name.
    #[arg(long)]
    pub app_name: Option<String>,

    #[command(flatten)]
    pub controller: ControllerArgs,

    /// Arguments handed to the script, after `--`.
    #[arg(last = true)]
    pub app_args: Vec<String>,
}

/// Options a config file may also set. Flags given here win.
#[derive(Args, Debug, Default)]
pub struct ControllerArgs {
    /// Where pid-files live: script, normal or system.
    #[arg(long, value_name = "MODE")]
    pub dir_mode: Option<DirMode>,

    /// Pid-file directory, relative to the script (script mode) or the
    /// current directory (normal mode).
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Allow several instances at once.
    #[arg(long)]
    pub multiple: bool,

    /// Stay in the foreground instead of daemonizing.
    #[arg(long)]
    pub ontop: bool,

    /// Write a crash report to `<name>.log` when the application fails.
    #[arg(long)]
    pub backtrace: bool,

    /// Send the daemon's stdout/stderr to `<name>.output`.
    #[arg(long)]
    pub log_output: bool,

    /// Start a monitor that restarts dead instances.
    #[arg(long)]
    pub monitor: bool,

    /// Clear stale pid-files instead of refusing.
    #[arg(long)]
    pub force: bool,

    /// YAML file with default options.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ControllerArgs {
    /// Options from `--config` (or defaults), with flags applied on top.
    pub fn resolve(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => Options::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Options::default(),
        };
        self.apply_to(&mut options);
        Ok(options)
    }

    /// Flags only ever switch behavior on; an absent flag keeps the config value.
    pub fn apply_to(&self, options: &mut Options) {
        if let Some(mode) = self.dir_mode {
            options.dir_mode = mode;
        }
        if let Some(dir) = &self.dir {
            options.dir = dir.clone();
        }
        options.multiple |= self.multiple;
        options.ontop |= self.ontop;
        options.backtrace |= self.backtrace;
        options.log_output |= self.log_output;
        options.monitor |= self.monitor;
        options.force |= self.force;
    }
}

pub fn run(command: Command, args: ControlArgs) -> Result<()> {
    warden_daemon::init_tracing();

    let options = args.controller.resolve()?;
    let script = absolute(&args.script)?;
    let name = match args.app_name {
        Some(name) => name,
        None => script
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .with_context(|| format!("cannot derive a name from {}", script.display()))?,
    };

    let ctx = AppContext::new(name.as_str(), Target::Exec(script), options)
        .with_argv(controller_argv(), args.app_args);
    let mut controller =
        Controller::new(ctx).with_context(|| format!("failed to inspect instances of {name}"))?;
    controller
        .run(command)
        .with_context(|| format!("{command} {name} failed"))
}

/// Daemons run from `/`, so the script path must not depend on the cwd.
fn absolute(script: &Path) -> Result<PathBuf> {
    if script.is_absolute() {
        return Ok(script.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(script))
}

/// This invocation's arguments up to `--`, exported to exec'd scripts.
fn controller_argv() -> Vec<String> {
    std::env::args()
        .skip(1)
        .take_while(|arg| arg != "--")
        .collect()
}
