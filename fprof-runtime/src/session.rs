//! The process-wide tracing session.
//!
//! One explicitly constructed [`Session`] replaces the usual pile of
//! process globals: it owns the configuration, the shared summary table,
//! the identity name table, and an ordered shutdown-hook list. Worker
//! contexts hold an `Arc` to it; nothing about it is ambient. The single
//! lock on the summary table is taken once per thread at merge time and
//! once at report time, never on the hot path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::collector::{FnStats, SummaryCollector};
use crate::config::{Config, Mode};
use crate::ident::FnId;
use crate::report::{self, ReportRow};

#[derive(Default)]
struct NameTable {
    by_name: HashMap<String, FnId>,
    by_id: HashMap<FnId, String>,
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

pub struct Session {
    config: Config,
    pid: u32,
    /// Resolved event-log directory (also holds metadata snapshots).
    log_dir: PathBuf,
    stats: Mutex<HashMap<FnId, FnStats>>,
    names: Mutex<NameTable>,
    next_id: AtomicU64,
    hooks: Mutex<Vec<ShutdownHook>>,
    closed: AtomicBool,
}

impl Session {
    /// Construct and initialize a session. In event mode this creates the
    /// log directory (exists-ok) and snapshots process metadata beside the
    /// logs; failures surface later as disabled writers, never as errors.
    pub fn init(config: Config) -> Arc<Session> {
        let pid = std::process::id();
        let log_dir = config.resolved_log_dir(pid);
        let session = Arc::new(Session {
            config,
            pid,
            log_dir,
            stats: Mutex::new(HashMap::new()),
            names: Mutex::new(NameTable::default()),
            next_id: AtomicU64::new(1),
            hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        if session.config.mode == Mode::Events {
            let _ = fs::create_dir_all(&session.log_dir);
            snapshot_process_metadata(&session.log_dir, pid);
        }
        session
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Intern a function name, assigning a fresh identity on first sight.
    pub fn intern(&self, name: &str) -> FnId {
        let mut names = lock(&self.names);
        if let Some(&id) = names.by_name.get(name) {
            return id;
        }
        let id = FnId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        names.by_name.insert(name.to_string(), id);
        names.by_id.insert(id, name.to_string());
        id
    }

    /// Intern a name and ensure it appears in the report even if no call
    /// is ever observed (a zeroed row, so coverage gaps stay visible).
    pub fn register(&self, name: &str) -> FnId {
        let id = self.intern(name);
        lock(&self.stats).entry(id).or_default();
        id
    }

    /// Merge a thread's local summary table into the shared one. Called
    /// once per thread at teardown.
    pub(crate) fn merge(&self, collector: &mut SummaryCollector) {
        if collector.is_empty() {
            return;
        }
        collector.merge_into(&mut lock(&self.stats));
    }

    pub(crate) fn lock_stats(&self) -> MutexGuard<'_, HashMap<FnId, FnStats>> {
        lock(&self.stats)
    }

    pub(crate) fn names_snapshot(&self) -> HashMap<FnId, String> {
        lock(&self.names).by_id.clone()
    }

    /// The rows the summary report would contain, resolved and sorted by
    /// descending total exclusive time.
    pub fn snapshot(&self) -> Vec<ReportRow> {
        report::snapshot_rows(self)
    }

    /// Run a closure during [`Session::shutdown`], before the session's own
    /// finalization. Hooks run in registration order.
    pub fn add_shutdown_hook(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.hooks).push(Box::new(hook));
    }

    /// Finalize the session: run registered hooks in order, then emit the
    /// summary report (summary mode) or the identity name table (event
    /// mode). Subsequent calls are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks: Vec<ShutdownHook> = std::mem::take(&mut *lock(&self.hooks));
        for hook in hooks {
            hook();
        }
        match self.config.mode {
            Mode::Summary => report::emit(self),
            Mode::Events => self.write_names_file(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Event logs carry interned identities that mean nothing off-process;
    /// dump the mapping beside them so offline readers can resolve names.
    fn write_names_file(&self) {
        let names = self.names_snapshot();
        if names.is_empty() {
            return;
        }
        let mut entries: Vec<(FnId, String)> = names.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        let mut body = String::new();
        for (id, name) in entries {
            body.push_str(&format!("{}\t{}\n", id.as_raw(), name));
        }
        let _ = fs::write(self.log_dir.join(format!("{}.names", self.pid)), body);
    }
}

/// Poisoning cannot corrupt these tables (all updates are single writes);
/// recover the guard rather than panicking inside instrumentation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Best-effort copies of the address-space map, the command line, and the
/// resolved executable path, named by process id. Offline reconstruction
/// needs these to turn addresses back into symbols.
fn snapshot_process_metadata(dir: &Path, pid: u32) {
    #[cfg(target_os = "linux")]
    for (src, ext) in [("/proc/self/maps", "maps"), ("/proc/self/cmdline", "cmdline")] {
        if let Ok(bytes) = fs::read(src) {
            let _ = fs::write(dir.join(format!("{pid}.{ext}")), bytes);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        let _ = fs::write(
            dir.join(format!("{pid}.exe")),
            exe.to_string_lossy().as_bytes(),
        );
    }
}
