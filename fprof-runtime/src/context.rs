//! Per-thread tracing state.
//!
//! A [`ThreadContext`] is owned by exactly one thread and holds whichever
//! backend the session's mode calls for: a local summary collector or an
//! event writer. Enter and exit hooks touch only this object, so the hot
//! path takes no locks. [`ThreadContext::finish`] hands the thread's data
//! back to the session; dropping the context does the same, so data
//! survives threads that never call finish explicitly.

use std::path::Path;
use std::sync::Arc;

use crate::clock;
use crate::collector::{FnStats, SummaryCollector};
use crate::config::Mode;
use crate::ident::FnId;
use crate::logger::{EventKind, EventWriter, LogRecord};
use crate::session::Session;

enum State {
    Summary(SummaryCollector),
    Events(EventWriter),
}

pub struct ThreadContext {
    session: Arc<Session>,
    state: State,
}

impl ThreadContext {
    pub fn new(session: Arc<Session>) -> ThreadContext {
        let state = match session.mode() {
            Mode::Summary => State::Summary(SummaryCollector::new()),
            Mode::Events => State::Events(EventWriter::new(
                session.log_dir().to_path_buf(),
                session.pid(),
                session.config().unbuffered,
            )),
        };
        ThreadContext { session, state }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn on_enter(&mut self, id: FnId) {
        self.on_enter_at(id, clock::now_ns());
    }

    pub fn on_exit(&mut self, id: FnId) {
        self.on_exit_at(id, clock::now_ns());
    }

    /// Enter with a caller-supplied timestamp.
    pub fn on_enter_at(&mut self, id: FnId, ts_ns: u64) {
        match &mut self.state {
            State::Summary(c) => c.on_enter_at(id, ts_ns),
            State::Events(w) => w.append(&LogRecord {
                ts_ns,
                id,
                kind: EventKind::Enter,
            }),
        }
    }

    /// Exit with a caller-supplied timestamp.
    pub fn on_exit_at(&mut self, id: FnId, ts_ns: u64) {
        match &mut self.state {
            State::Summary(c) => c.on_exit_at(id, ts_ns),
            State::Events(w) => w.append(&LogRecord {
                ts_ns,
                id,
                kind: EventKind::Exit,
            }),
        }
    }

    /// Open frames on this thread's stack. Always zero in event mode,
    /// which keeps no stack.
    pub fn depth(&self) -> usize {
        match &self.state {
            State::Summary(c) => c.depth(),
            State::Events(_) => 0,
        }
    }

    /// This thread's accumulated numbers for one function, before any
    /// merge. `None` in event mode or for an unseen identity.
    pub fn stats(&self, id: FnId) -> Option<FnStats> {
        match &self.state {
            State::Summary(c) => c.stats(id),
            State::Events(_) => None,
        }
    }

    /// Where this thread's event log landed, once it has been opened.
    pub fn log_path(&self) -> Option<&Path> {
        match &self.state {
            State::Summary(_) => None,
            State::Events(w) => w.path(),
        }
    }

    /// Tear down this thread's view: merge the local summary table into
    /// the session, or flush and close the event log. Safe to call more
    /// than once; later calls find nothing left to hand over.
    pub fn finish(&mut self) {
        match &mut self.state {
            State::Summary(c) => self.session.merge(c),
            State::Events(w) => w.finish(),
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.finish();
    }
}
