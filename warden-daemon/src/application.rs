//! One managed instance: start / run / stop / zap / status.

use std::fmt;
use std::os::unix::process::CommandExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult, Pid};
use warden_core::{process, resolve_dir, AppName, Options, PidFile, PidMem, PidStore};

use crate::crash_log;
use crate::daemonize::daemonize;
use crate::error::{io_err, DaemonError};
use crate::log_rotation::rotate_output_log;
use crate::paths::{crash_log_path, output_log_path, ARGV_ENV};
use crate::signals;

/// Error type returned by an in-process body.
pub type ProcError = Box<dyn std::error::Error + Send + Sync>;

/// An in-process body. Receives the application arguments. Called once per
/// launch, possibly many times over the life of a monitor.
pub type ProcFn = Arc<dyn Fn(&[String]) -> Result<(), ProcError> + Send + Sync>;

/// What an instance runs.
#[derive(Clone)]
pub enum Target {
    /// Replace the process image with this executable.
    Exec(PathBuf),
    /// Run a closure inside the daemon process.
    Proc(ProcFn),
}

impl Target {
    pub fn proc<F>(body: F) -> Self
    where
        F: Fn(&[String]) -> Result<(), ProcError> + Send + Sync + 'static,
    {
        Target::Proc(Arc::new(body))
    }

    /// Script path, used for script-relative pid-file directories.
    pub fn script(&self) -> Option<&Path> {
        match self {
            Target::Exec(script) => Some(script),
            Target::Proc(_) => None,
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Exec(script) => f.debug_tuple("Exec").field(script).finish(),
            Target::Proc(_) => f.write_str("Proc(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Settings shared by a group and all of its instances.
#[derive(Debug)]
pub struct AppContext {
    pub name: AppName,
    pub target: Target,
    pub options: Options,
    pub controller_argv: Vec<String>,
    pub app_argv: Vec<String>,
    pid_dir: Option<PathBuf>,
}

impl AppContext {
    /// Resolves the pid-file directory once; `None` means records stay in memory.
    pub fn new(name: impl Into<AppName>, target: Target, options: Options) -> Self {
        let pid_dir = resolve_dir(options.dir_mode, &options.dir, target.script());
        Self {
            name: name.into(),
            target,
            options,
            controller_argv: Vec::new(),
            app_argv: Vec::new(),
            pid_dir,
        }
    }

    pub fn with_argv(mut self, controller_argv: Vec<String>, app_argv: Vec<String>) -> Self {
        self.controller_argv = controller_argv;
        self.app_argv = app_argv;
        self
    }

    pub fn pid_dir(&self) -> Option<&Path> {
        self.pid_dir.as_deref()
    }

    pub fn output_log_path(&self) -> Option<PathBuf> {
        self.pid_dir()
            .map(|dir| output_log_path(dir, self.name.as_str()))
    }

    pub fn crash_log_path(&self) -> Option<PathBuf> {
        self.pid_dir()
            .map(|dir| crash_log_path(dir, self.name.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running { pid: u32 },
    /// The record survives its process. `pid` is `None` if the record is unreadable.
    Stale { pid: Option<u32> },
    NotRunning,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running { pid } => write!(f, "running [pid {pid}]"),
            Status::Stale { pid: Some(pid) } => {
                write!(f, "not running (but pid-file exists: {pid})")
            }
            Status::Stale { pid: None } => f.write_str("not running (but pid-file exists)"),
            Status::NotRunning => f.write_str("not running"),
        }
    }
}

/// How the in-process body of this instance ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExitReason {
    #[default]
    Running,
    Finished,
    Failed(String),
    /// SIGTERM arrived; exit hooks must not report a crash.
    Signalled,
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Application {
    ctx: Arc<AppContext>,
    record: Arc<dyn PidStore>,
    exit_reason: Arc<Mutex<ExitReason>>,
}

impl Application {
    /// A new instance with no record written yet.
    pub(crate) fn fresh(ctx: Arc<AppContext>) -> Result<Self, DaemonError> {
        let record: Arc<dyn PidStore> = match ctx.pid_dir() {
            Some(dir) => Arc::new(PidFile::new(dir, ctx.name.as_str(), ctx.options.multiple)?),
            None => Arc::new(PidMem::new()),
        };
        Ok(Self::with_record(ctx, record))
    }

    /// An instance rebuilt from a pid-file found on disk.
    pub(crate) fn existing(ctx: Arc<AppContext>, record: PidFile) -> Self {
        Self::with_record(ctx, Arc::new(record))
    }

    fn with_record(ctx: Arc<AppContext>, record: Arc<dyn PidStore>) -> Self {
        Self {
            ctx,
            record,
            exit_reason: Arc::new(Mutex::new(ExitReason::Running)),
        }
    }

    pub fn name(&self) -> &AppName {
        &self.ctx.name
    }

    pub fn record(&self) -> &dyn PidStore {
        self.record.as_ref()
    }

    pub fn exit_reason(&self) -> ExitReason {
        lock(&self.exit_reason).clone()
    }

    /// Daemonize (unless `ontop`), record our pid, then run the target.
    ///
    /// In exec mode this only returns on failure. In-process, it returns once
    /// the body finishes; the record is removed on the way out.
    pub fn start(&self) -> Result<(), DaemonError> {
        let options = &self.ctx.options;
        if !options.ontop {
            let output = if options.log_output {
                self.ctx.output_log_path()
            } else {
                None
            };
            if let Some(path) = &output {
                rotate_output_log(path);
            }
            daemonize(output.as_deref())?;
        }

        match &self.ctx.target {
            Target::Exec(script) => {
                self.record_own_pid()?;
                let err = self.run_via_exec(script);
                self.discard_record();
                Err(err)
            }
            Target::Proc(body) => {
                // a SIGTERM must never find a pid-file without its handler
                self.install_terminate_handler()?;
                self.record_own_pid()?;
                self.run_guarded(body)
            }
        }
    }

    fn record_own_pid(&self) -> Result<(), DaemonError> {
        let pid = std::process::id();
        self.record.set_pid(pid)?;
        tracing::info!(app = %self.ctx.name, pid, path = ?self.record.path(), "pid recorded");
        Ok(())
    }

    /// Run in the foreground without daemonizing or recording a pid.
    pub fn run(&self) -> Result<(), DaemonError> {
        match &self.ctx.target {
            Target::Exec(script) => Err(self.run_via_exec(script)),
            Target::Proc(body) => self.invoke(body).map_err(|source| DaemonError::Proc {
                app: self.ctx.name.to_string(),
                source,
            }),
        }
    }

    /// Send SIGTERM to the recorded process, then remove the record.
    ///
    /// With `force`, an instance that is not running is zapped instead.
    pub fn stop(&self) -> Result<(), DaemonError> {
        if self.ctx.options.force && !self.is_running() {
            return self.zap();
        }

        let pid = self.record.pid()?;
        if signals::send_terminate(pid)? {
            tracing::info!(app = %self.ctx.name, pid, "sent SIGTERM");
        } else {
            tracing::warn!(app = %self.ctx.name, pid, "process already gone");
        }

        // the target may not clean up after itself
        self.discard_record();
        Ok(())
    }

    /// Remove the record without signalling anything.
    pub fn zap(&self) -> Result<(), DaemonError> {
        self.record.cleanup()?;
        tracing::info!(app = %self.ctx.name, path = ?self.record.path(), "pid record removed");
        Ok(())
    }

    /// Whether the record exists and names a live process.
    ///
    /// An unusable process listing counts as not running.
    pub fn is_running(&self) -> bool {
        if !self.record.exists() {
            return false;
        }
        let Ok(pid) = self.record.pid() else {
            return false;
        };
        match process::is_running(pid, None) {
            Ok(running) => running,
            Err(err) => {
                tracing::warn!(app = %self.ctx.name, pid, error = %err, "liveness check failed");
                false
            }
        }
    }

    pub fn status(&self) -> Status {
        if self.is_running() {
            if let Ok(pid) = self.record.pid() {
                return Status::Running { pid };
            }
        }
        if self.record.exists() {
            return Status::Stale {
                pid: self.record.pid().ok(),
            };
        }
        Status::NotRunning
    }

    pub fn show_status(&self) {
        println!("{}: {}", self.ctx.name, self.status());
    }

    /// Start this instance in a forked child so the caller keeps running.
    ///
    /// Forks from a fresh thread: a child forked on a thread inside a tokio
    /// runtime (the monitor's watch loop) could never block on a runtime of
    /// its own.
    pub(crate) fn launch_detached(&self) -> Result<(), DaemonError> {
        let app = self.clone();
        std::thread::Builder::new()
            .name("warden-launcher".to_string())
            .spawn(move || app.fork_instance())
            .map_err(|e| io_err("warden-launcher thread", e))?
            .join()
            .unwrap_or_else(|_| {
                Err(io_err(
                    "warden-launcher thread",
                    std::io::Error::other("launcher panicked"),
                ))
            })
    }

    fn fork_instance(&self) -> Result<(), DaemonError> {
        // SAFETY: the child only runs `start` and then exits.
        match unsafe { fork() }.map_err(DaemonError::Fork)? {
            ForkResult::Child => {
                let code = match self.start() {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(app = %self.ctx.name, error = %err, "instance failed");
                        1
                    }
                };
                std::process::exit(code);
            }
            ForkResult::Parent { child } => {
                if self.ctx.options.ontop {
                    // the child is the instance itself
                    if !self.record.is_file_backed() {
                        self.record.set_pid(child.as_raw().unsigned_abs())?;
                    }
                    reap_in_background(child);
                } else if let Err(err) = waitpid(child, None) {
                    // the child exits as soon as daemonize forks
                    tracing::debug!(pid = child.as_raw(), error = %err, "waitpid failed");
                }
                tracing::info!(app = %self.ctx.name, "instance launched");
                Ok(())
            }
        }
    }

    fn run_via_exec(&self, script: &Path) -> DaemonError {
        let source = Command::new(script)
            .args(&self.ctx.app_argv)
            .env(ARGV_ENV, self.ctx.controller_argv.join(" "))
            .exec();
        DaemonError::Exec {
            script: script.to_path_buf(),
            source,
        }
    }

    /// On SIGTERM: mark the exit as signalled, remove the record, exit 0.
    fn install_terminate_handler(&self) -> Result<(), DaemonError> {
        let reason = Arc::clone(&self.exit_reason);
        let record = Arc::clone(&self.record);
        let name = self.ctx.name.clone();
        signals::on_terminate(move || {
            *lock(&reason) = ExitReason::Signalled;
            if let Err(err) = record.cleanup() {
                tracing::warn!(app = %name, error = %err, "failed to remove pid record");
            }
            std::process::exit(0);
        })
    }

    /// Run the body, then remove the record and report a crash if it failed.
    fn run_guarded(&self, body: &ProcFn) -> Result<(), DaemonError> {
        let outcome = self.invoke(body);
        self.discard_record();

        let mut reason = lock(&self.exit_reason);
        if *reason == ExitReason::Signalled {
            return Ok(());
        }
        match outcome {
            Ok(()) => {
                *reason = ExitReason::Finished;
                Ok(())
            }
            Err(source) => {
                *reason = ExitReason::Failed(source.to_string());
                drop(reason);
                self.report_crash(source.as_ref());
                Err(DaemonError::Proc {
                    app: self.ctx.name.to_string(),
                    source,
                })
            }
        }
    }

    /// Call the body, turning a panic into an error.
    fn invoke(&self, body: &ProcFn) -> Result<(), ProcError> {
        match panic::catch_unwind(AssertUnwindSafe(|| body(&self.ctx.app_argv))) {
            Ok(result) => result,
            Err(payload) => Err(panic_message(payload).into()),
        }
    }

    fn report_crash(&self, error: &(dyn std::error::Error + Send + Sync + 'static)) {
        let options = &self.ctx.options;
        if !options.backtrace || options.ontop {
            return;
        }
        let Some(path) = self.ctx.crash_log_path() else {
            return;
        };
        if let Err(err) = crash_log::append(&path, error) {
            tracing::warn!(path = %path.display(), error = %err, "failed to write crash log");
        }
    }

    /// Best-effort removal; the record may already be gone.
    fn discard_record(&self) {
        if let Err(err) = self.record.cleanup() {
            tracing::debug!(app = %self.ctx.name, error = %err, "pid record cleanup failed");
        }
    }
}

fn lock(reason: &Mutex<ExitReason>) -> std::sync::MutexGuard<'_, ExitReason> {
    reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}

fn reap_in_background(child: Pid) {
    let spawned = std::thread::Builder::new()
        .name("warden-reaper".to_string())
        .spawn(move || {
            let _ = waitpid(child, None);
        });
    if let Err(err) = spawned {
        tracing::debug!(pid = child.as_raw(), error = %err, "failed to spawn reaper");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::WaitStatus;
    use tempfile::TempDir;
    use warden_core::DirMode;

    fn options(dir: &Path) -> Options {
        Options {
            dir_mode: DirMode::Normal,
            dir: dir.to_path_buf(),
            ontop: true,
            ..Options::default()
        }
    }

    fn proc_ctx(options: Options, target: Target) -> Arc<AppContext> {
        Arc::new(AppContext::new("pinger", target, options))
    }

    fn wait_until(what: &str, mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if ready() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for {what}");
    }

    /// Fork a child that runs `start` and exits; returns the child's pid.
    fn start_in_child(app: &Application) -> Pid {
        // SAFETY: the child only runs `start` and then exits.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                let code = i32::from(app.start().is_err());
                std::process::exit(code);
            }
            ForkResult::Parent { child } => child,
        }
    }

    #[test]
    fn status_lines_follow_precedence() {
        assert_eq!(Status::NotRunning.to_string(), "not running");
        assert_eq!(
            Status::Running { pid: 42 }.to_string(),
            "running [pid 42]"
        );
        assert_eq!(
            Status::Stale { pid: Some(42) }.to_string(),
            "not running (but pid-file exists: 42)"
        );
    }

    #[test]
    fn status_reports_absent_live_and_stale_records() {
        let dir = TempDir::new().unwrap();
        let ctx = proc_ctx(options(dir.path()), Target::proc(|_| Ok(())));
        let app = Application::fresh(ctx).unwrap();
        assert_eq!(app.status(), Status::NotRunning);

        let me = std::process::id();
        app.record().set_pid(me).unwrap();
        assert_eq!(app.status(), Status::Running { pid: me });

        let mut child = Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        app.record().set_pid(dead).unwrap();
        assert_eq!(app.status(), Status::Stale { pid: Some(dead) });
    }

    #[test]
    fn ontop_start_records_pid_and_cleans_up_after_body() {
        let dir = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_body = Arc::clone(&seen);
        let pid_path = dir.path().join("pinger.pid");
        let pid_path_in_body = pid_path.clone();

        let target = Target::proc(move |args| {
            let recorded = fs::read_to_string(&pid_path_in_body)?;
            *seen_in_body.lock().unwrap() = Some((recorded, args.to_vec()));
            Ok(())
        });
        let ctx = Arc::new(
            AppContext::new("pinger", target, options(dir.path()))
                .with_argv(vec![], vec!["--port".into(), "8080".into()]),
        );
        let app = Application::fresh(ctx).unwrap();

        app.start().unwrap();

        let (recorded, args) = seen.lock().unwrap().clone().expect("body ran");
        assert_eq!(recorded, std::process::id().to_string());
        assert_eq!(args, vec!["--port", "8080"]);
        assert!(!pid_path.exists(), "exit hook must remove the pid-file");
        assert_eq!(app.exit_reason(), ExitReason::Finished);
    }

    #[test]
    fn failing_body_is_reported_and_record_removed() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.backtrace = true;
        let ctx = proc_ctx(
            opts,
            Target::proc(|_| Err("connection refused".into())),
        );
        let app = Application::fresh(ctx).unwrap();

        let err = app.start().unwrap_err();
        assert!(matches!(err, DaemonError::Proc { .. }), "got: {err}");
        assert!(err.to_string().contains("pinger"));
        assert!(!dir.path().join("pinger.pid").exists());
        assert_eq!(
            app.exit_reason(),
            ExitReason::Failed("connection refused".to_string())
        );
        // crash logs are only written for daemonized instances
        assert!(!dir.path().join("pinger.log").exists());
    }

    #[test]
    fn panicking_body_becomes_an_error() {
        let dir = TempDir::new().unwrap();
        let ctx = proc_ctx(options(dir.path()), Target::proc(|_| panic!("boom")));
        let app = Application::fresh(ctx).unwrap();

        let err = app.run().unwrap_err();
        assert!(err.to_string().contains("panicked: boom"), "got: {err}");
    }

    #[test]
    fn zap_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ctx = proc_ctx(options(dir.path()), Target::proc(|_| Ok(())));
        let app = Application::fresh(ctx).unwrap();
        app.record().set_pid(1).unwrap();

        app.zap().unwrap();
        app.zap().unwrap();
        assert!(!app.record().exists());
    }

    #[test]
    fn stop_with_force_zaps_dead_instance() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.force = true;
        let ctx = proc_ctx(opts, Target::proc(|_| Ok(())));
        let app = Application::fresh(ctx).unwrap();

        let mut child = Command::new("true").spawn().unwrap();
        let dead = child.id();
        child.wait().unwrap();
        app.record().set_pid(dead).unwrap();

        app.stop().unwrap();
        assert!(!app.record().exists());
    }

    #[test]
    fn stop_terminates_recorded_process() {
        let dir = TempDir::new().unwrap();
        let ctx = proc_ctx(options(dir.path()), Target::proc(|_| Ok(())));
        let app = Application::fresh(ctx).unwrap();

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        app.record().set_pid(child.id()).unwrap();

        app.stop().unwrap();
        assert!(!child.wait().unwrap().success());
        assert!(!app.record().exists());
    }

    #[test]
    fn no_directory_falls_back_to_memory_record() {
        let ctx = Arc::new(AppContext::new(
            "pinger",
            Target::proc(|_| Ok(())),
            Options::default(),
        ));
        assert_eq!(ctx.pid_dir(), None);
        let app = Application::fresh(ctx).unwrap();
        assert!(!app.record().is_file_backed());
    }

    #[test]
    fn sigterm_handler_removes_record_and_exits_cleanly() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("pinger.pid");
        let target = Target::proc(|_| loop {
            std::thread::sleep(Duration::from_secs(60));
        });
        let app = Application::fresh(proc_ctx(options(dir.path()), target)).unwrap();

        let child = start_in_child(&app);
        wait_until("pid-file", || {
            fs::read_to_string(&pid_path).is_ok_and(|pid| !pid.is_empty())
        });
        assert_eq!(
            fs::read_to_string(&pid_path).unwrap(),
            child.as_raw().to_string()
        );

        // signalled as soon as the record is visible; the handler must already be in place
        kill(child, Signal::SIGTERM).unwrap();
        assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
        assert!(!pid_path.exists(), "handler must remove the pid-file");
    }

    #[test]
    fn daemonized_failure_appends_timestamped_crash_report() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.ontop = false;
        opts.backtrace = true;
        let target = Target::proc(|_| Err("connection refused".into()));
        let app = Application::fresh(proc_ctx(opts, target)).unwrap();

        let child = start_in_child(&app);
        // the first daemonize fork makes the direct child exit at once
        waitpid(child, None).unwrap();

        let log = dir.path().join("pinger.log");
        wait_until("crash report", || {
            fs::read_to_string(&log).is_ok_and(|report| report.contains("connection refused"))
        });
        let report = fs::read_to_string(&log).unwrap();
        let stamp = report.lines().next().unwrap();
        assert!(
            chrono::DateTime::parse_from_rfc3339(stamp).is_ok(),
            "first line must be a timestamp, got: {stamp}"
        );
        assert!(!dir.path().join("pinger.pid").exists());
    }

    #[test]
    fn launch_from_inside_a_runtime_lets_body_start_its_own() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let marker_in_body = marker.clone();
        let target = Target::proc(move |_| {
            tokio::runtime::Builder::new_current_thread()
                .build()?
                .block_on(async {});
            fs::write(&marker_in_body, "up")?;
            Ok(())
        });
        let app = Application::fresh(proc_ctx(options(dir.path()), target)).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async { app.launch_detached() }).unwrap();

        wait_until("marker", || {
            fs::read_to_string(&marker).is_ok_and(|m| m == "up")
        });
        wait_until("record cleanup", || !dir.path().join("pinger.pid").exists());
    }
}
