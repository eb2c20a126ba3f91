//! Runtime configuration, read once from the environment at session init.

use std::path::PathBuf;

/// Which collection strategy a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Aggregate per-function timing in memory; emit a CSV report at shutdown.
    #[default]
    Summary,
    /// Stream raw enter/exit records to per-thread binary log files.
    Events,
}

/// Session configuration.
///
/// Recognized environment variables:
/// - `FPROF_MODE`: `events` selects the event log; anything else (including
///   unset) selects the summary profiler.
/// - `FPROF_OUT`: file to receive the summary CSV report; default is stderr.
/// - `FPROF_DIR`: directory for event logs and metadata snapshots; default
///   is `<tmp>/fprof-<pid>`.
/// - `FPROF_UNBUFFERED`: a leading `1` forces one write per record.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub mode: Mode,
    /// Summary report destination. `None` writes to stderr.
    pub report_path: Option<PathBuf>,
    /// Event-log directory. `None` derives a per-process temp directory.
    pub log_dir: Option<PathBuf>,
    /// Event mode: bypass the in-memory buffer entirely.
    pub unbuffered: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values are
    /// treated as unset, matching how shells commonly clear variables.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| get(name).filter(|v| !v.is_empty());

        let mode = match get("FPROF_MODE").as_deref() {
            Some("events") => Mode::Events,
            _ => Mode::Summary,
        };

        Config {
            mode,
            report_path: get("FPROF_OUT").map(PathBuf::from),
            log_dir: get("FPROF_DIR").map(PathBuf::from),
            unbuffered: get("FPROF_UNBUFFERED").is_some_and(|v| v.starts_with('1')),
        }
    }

    /// The directory event logs and metadata snapshots land in.
    pub(crate) fn resolved_log_dir(&self, pid: u32) -> PathBuf {
        match &self.log_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(format!("fprof-{pid}")),
        }
    }
}
