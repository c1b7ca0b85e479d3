use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const TICKER: &str = "#!/bin/sh\necho \"ticker up: $*\"\nwhile true; do sleep 1; done\n";

fn warden_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("warden"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if ready() {
            return;
        }
        sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {what}");
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn alive(pid: u32) -> bool {
    warden_core::process::is_running(pid, None).expect("ps ax")
}

/// Stops whatever a test left running under `script`.
struct Cleanup {
    script: PathBuf,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = warden_cmd().arg("stop").arg(&self.script).output();
    }
}

#[test]
fn start_status_stop_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "ticker.sh", TICKER);
    let _cleanup = Cleanup {
        script: script.clone(),
    };
    let pid_file = dir.path().join("ticker.sh.pid");

    warden_cmd()
        .args(["start", "--log-output"])
        .arg(&script)
        .args(["--", "alpha", "beta"])
        .assert()
        .success();

    wait_for("pid-file", || read_pid(&pid_file).is_some());
    let pid = read_pid(&pid_file).expect("pid");
    wait_for("daemon process", || alive(pid));

    warden_cmd()
        .arg("status")
        .arg(&script)
        .assert()
        .success()
        .stdout(contains(format!("ticker.sh: running [pid {pid}]")));

    let output_log = dir.path().join("ticker.sh.output");
    wait_for("output log", || {
        fs::read_to_string(&output_log).is_ok_and(|s| s.contains("ticker up: alpha beta"))
    });

    warden_cmd().arg("stop").arg(&script).assert().success();

    assert!(!pid_file.exists(), "stop must remove the pid-file");
    wait_for("daemon exit", || !alive(pid));
    warden_cmd()
        .arg("status")
        .arg(&script)
        .assert()
        .success()
        .stdout(contains("ticker.sh: no instances running"));
}

#[test]
fn second_start_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "solo.sh", TICKER);
    let _cleanup = Cleanup {
        script: script.clone(),
    };
    let pid_file = dir.path().join("solo.sh.pid");

    warden_cmd().arg("start").arg(&script).assert().success();
    wait_for("pid-file", || read_pid(&pid_file).is_some_and(alive));
    let first = read_pid(&pid_file);

    warden_cmd()
        .arg("start")
        .arg(&script)
        .assert()
        .failure()
        .stderr(contains("already one or more instance(s) of solo.sh running"));
    assert_eq!(read_pid(&pid_file), first, "refused start must not touch the record");
}

#[test]
fn restart_produces_a_new_pid() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "again.sh", TICKER);
    let _cleanup = Cleanup {
        script: script.clone(),
    };
    let pid_file = dir.path().join("again.sh.pid");

    warden_cmd().arg("start").arg(&script).assert().success();
    wait_for("pid-file", || read_pid(&pid_file).is_some_and(alive));
    let before = read_pid(&pid_file).expect("pid");

    warden_cmd().arg("restart").arg(&script).assert().success();

    wait_for("new instance", || {
        read_pid(&pid_file).is_some_and(|pid| pid != before && alive(pid))
    });
    wait_for("old instance exit", || !alive(before));
}

#[test]
fn stale_record_is_reported_then_zapped() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "gone.sh", TICKER);
    let pid_file = dir.path().join("gone.sh.pid");

    let mut child = Command::new("true").spawn().expect("spawn true");
    let dead = child.id();
    child.wait().expect("wait");
    fs::write(&pid_file, dead.to_string()).expect("write stale pid");

    warden_cmd()
        .arg("status")
        .arg(&script)
        .assert()
        .success()
        .stdout(contains(format!(
            "gone.sh: not running (but pid-file exists: {dead})"
        )));

    warden_cmd().arg("zap").arg(&script).assert().success();
    assert!(!pid_file.exists());

    // zapping twice is harmless
    warden_cmd().arg("zap").arg(&script).assert().success();
}

#[test]
fn force_start_replaces_stale_record() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "phoenix.sh", TICKER);
    let _cleanup = Cleanup {
        script: script.clone(),
    };
    let pid_file = dir.path().join("phoenix.sh.pid");
    fs::write(&pid_file, "999999999").expect("write stale pid");

    warden_cmd()
        .arg("start")
        .arg(&script)
        .assert()
        .failure()
        .stderr(contains("already one or more instance(s)"));

    warden_cmd()
        .args(["start", "--force"])
        .arg(&script)
        .assert()
        .success();
    wait_for("fresh instance", || {
        read_pid(&pid_file).is_some_and(|pid| pid != 999_999_999 && alive(pid))
    });
}

#[test]
fn run_execs_in_foreground_with_arguments() {
    let dir = TempDir::new().expect("tempdir");
    let record = dir.path().join("args.txt");
    let body = format!(
        "#!/bin/sh\necho \"$*\" > {out}\necho \"$WARDEN_ARGV\" >> {out}\n",
        out = record.display()
    );
    let script = write_script(dir.path(), "echo.sh", &body);

    warden_cmd()
        .arg("run")
        .arg(&script)
        .args(["--", "one", "two"])
        .assert()
        .success();

    let written = fs::read_to_string(&record).expect("script output");
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("one two"));
    assert!(lines.next().is_some_and(|l| l.starts_with("run ")));
    assert!(!dir.path().join("echo.sh.pid").exists());
}

#[test]
fn multiple_instances_are_numbered() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "worker.sh", TICKER);
    let _cleanup = Cleanup {
        script: script.clone(),
    };

    for n in 0..2 {
        warden_cmd()
            .args(["start", "--multiple"])
            .arg(&script)
            .assert()
            .success();
        let pid_file = dir.path().join(format!("worker.sh_num{n}.pid"));
        wait_for("numbered pid-file", || read_pid(&pid_file).is_some());
    }

    warden_cmd()
        .arg("status")
        .arg(&script)
        .assert()
        .success()
        .stdout(contains("worker.sh: running").count(2));
}

#[test]
fn unknown_dir_mode_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let script = write_script(dir.path(), "any.sh", TICKER);

    warden_cmd()
        .args(["status", "--dir-mode", "home"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(contains("not implemented"));
}
