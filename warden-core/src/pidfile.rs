//! Pid records: the on-disk (or in-memory) identity of a managed process.
//!
//! # Storage layout
//!
//! ```text
//! <pid dir>/
//!   <name>.pid            (single instance)
//!   <name>_num<N>.pid     (one per instance when `multiple` is set)
//!   <name>_monitor.pid    (the group's monitor)
//! ```
//!
//! Each file holds exactly one decimal process id and nothing else.
//! There is no locking: two writers racing on the same file end with the last
//! write winning.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use crate::error::{io_err, PidError};
use crate::types::DirMode;

/// Pid-file directory used by [`DirMode::System`].
pub const SYSTEM_RUN_DIR: &str = "/var/run";

/// Upper bound on numbered instances of one program.
pub const MAX_INSTANCES: u32 = 1024;

const PID_SUFFIX: &str = ".pid";
const NUMBER_MARKER: &str = "_num";

// ---------------------------------------------------------------------------
// 1. Directory resolution and discovery
// ---------------------------------------------------------------------------

/// Resolve the pid-file directory for `mode`.
///
/// Returns `None` when `mode` is [`DirMode::Script`] and no script path is
/// known, or when the current directory cannot be determined.
pub fn resolve_dir(mode: DirMode, dir: &Path, script: Option<&Path>) -> Option<PathBuf> {
    match mode {
        DirMode::Normal => expand_path(dir),
        DirMode::Script => {
            let script = script?;
            let base = script.parent().unwrap_or_else(|| Path::new(""));
            expand_path(&base.join(dir))
        }
        DirMode::System => Some(PathBuf::from(SYSTEM_RUN_DIR)),
    }
}

/// Absolute, lexically normalised form of `path` (`..` and `.` folded away).
fn expand_path(path: &Path) -> Option<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// File name of the pid-file for `progname`, numbered or not.
pub fn file_name(progname: &str, number: Option<u32>) -> String {
    match number {
        Some(n) => format!("{progname}{NUMBER_MARKER}{n}{PID_SUFFIX}"),
        None => format!("{progname}{PID_SUFFIX}"),
    }
}

/// Split a pid-file name into program name and instance number.
///
/// `app.pid` → `("app", None)`, `app_num3.pid` → `("app", Some(3))`.
pub fn parse_file_name(name: &str) -> Option<(&str, Option<u32>)> {
    let stem = name.strip_suffix(PID_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    if let Some((progname, digits)) = stem.rsplit_once(NUMBER_MARKER) {
        if !progname.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
        {
            if let Ok(n) = digits.parse() {
                return Some((progname, Some(n)));
            }
        }
    }
    Some((stem, None))
}

/// Pid-files in `dir` that belong to `progname`, sorted by path.
///
/// Matches `<progname>.pid` and `<progname>_num<N>.pid` only; a missing
/// directory yields an empty list.
pub fn find_files(dir: &Path, progname: &str) -> Result<Vec<PathBuf>, PidError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(dir, err)),
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name();
            let Some(name) = name.to_str() else {
                return false;
            };
            matches!(parse_file_name(name), Some((p, _)) if p == progname)
        })
        .map(|e| e.path())
        .collect();
    found.sort();
    Ok(found)
}

// ---------------------------------------------------------------------------
// 2. Capability interface
// ---------------------------------------------------------------------------

/// What an application or monitor needs from its pid record.
pub trait PidStore: Send + Sync + std::fmt::Debug {
    /// The recorded process id.
    fn pid(&self) -> Result<u32, PidError>;

    /// Record `pid`, replacing anything stored before.
    fn set_pid(&self, pid: u32) -> Result<(), PidError>;

    /// Forget the record. Succeeds if there was nothing to forget.
    fn cleanup(&self) -> Result<(), PidError>;

    /// Whether a record is present, regardless of whether its process lives.
    fn exists(&self) -> bool;

    /// Backing file, for records that have one.
    fn path(&self) -> Option<PathBuf>;

    fn is_file_backed(&self) -> bool {
        self.path().is_some()
    }
}

// ---------------------------------------------------------------------------
// 3. File-backed record
// ---------------------------------------------------------------------------

/// One pid-file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    dir: PathBuf,
    progname: String,
    number: Option<u32>,
}

impl PidFile {
    /// A record for a new instance. With `multiple`, picks the lowest instance
    /// number whose file does not exist yet.
    pub fn new(
        dir: impl Into<PathBuf>,
        progname: impl Into<String>,
        multiple: bool,
    ) -> Result<Self, PidError> {
        let dir = dir.into();
        let progname = progname.into();

        let number = if multiple {
            let mut n = 0;
            while dir.join(file_name(&progname, Some(n))).exists() {
                n += 1;
                if n >= MAX_INSTANCES {
                    return Err(PidError::TooManyInstances {
                        progname,
                        limit: MAX_INSTANCES,
                    });
                }
            }
            Some(n)
        } else {
            None
        };

        Ok(Self {
            dir,
            progname,
            number,
        })
    }

    /// Rebuild the record for a pid-file discovered on disk. Nothing is written.
    pub fn existing(path: &Path) -> Result<Self, PidError> {
        let not_a_pid_file = || PidError::NotAPidFile {
            path: path.to_path_buf(),
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(not_a_pid_file)?;
        let (progname, number) = parse_file_name(name).ok_or_else(not_a_pid_file)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(Self {
            dir,
            progname: progname.to_owned(),
            number,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn progname(&self) -> &str {
        &self.progname
    }

    pub fn number(&self) -> Option<u32> {
        self.number
    }

    /// `<dir>/<progname>[_num<N>].pid`. Pure, no I/O.
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(file_name(&self.progname, self.number))
    }

    /// Persist `pid` as the sole content of the file, creating the directory.
    pub fn write(&self, pid: u32) -> Result<(), PidError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        }
        let path = self.file_path();
        fs::write(&path, pid.to_string()).map_err(|e| io_err(&path, e))
    }

    pub fn read(&self) -> Result<u32, PidError> {
        let path = self.file_path();
        let content = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        content
            .trim()
            .parse::<u32>()
            .map_err(|_| PidError::Malformed { path, content })
    }

    /// Delete the file. Already absent is not an error; anything else is.
    pub fn remove(&self) -> Result<(), PidError> {
        let path = self.file_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path, err)),
        }
    }

    pub fn exists(&self) -> bool {
        self.file_path().is_file()
    }
}

impl PidStore for PidFile {
    fn pid(&self) -> Result<u32, PidError> {
        self.read()
    }

    fn set_pid(&self, pid: u32) -> Result<(), PidError> {
        self.write(pid)
    }

    fn cleanup(&self) -> Result<(), PidError> {
        self.remove()
    }

    fn exists(&self) -> bool {
        PidFile::exists(self)
    }

    fn path(&self) -> Option<PathBuf> {
        Some(self.file_path())
    }
}

// ---------------------------------------------------------------------------
// 4. In-memory record
// ---------------------------------------------------------------------------

/// A record that lives only in this process, used when no pid-file directory applies.
#[derive(Debug, Default)]
pub struct PidMem {
    pid: Mutex<Option<u32>>,
}

impl PidMem {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<u32>> {
        self.pid.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PidStore for PidMem {
    fn pid(&self) -> Result<u32, PidError> {
        self.slot().ok_or(PidError::Missing)
    }

    fn set_pid(&self, pid: u32) -> Result<(), PidError> {
        *self.slot() = Some(pid);
        Ok(())
    }

    fn cleanup(&self) -> Result<(), PidError> {
        *self.slot() = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.slot().is_some()
    }

    fn path(&self) -> Option<PathBuf> {
        None
    }
}
