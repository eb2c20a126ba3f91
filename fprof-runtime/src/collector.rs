//! Summary-mode collection: per-thread call stacks and timing tables.
//!
//! Each thread owns a [`SummaryCollector`]: a stack of active call frames
//! plus a private statistics table. Nothing here is shared or locked; the
//! single global table lives in the session and is only touched when a
//! collector merges into it at thread teardown.
//!
//! Exit handling *drains*: frames are popped until the one matching the
//! exiting function is found (or the stack empties). A well-nested program
//! pops exactly one frame per exit; a non-local transfer that skipped exit
//! notifications pops several, so the stack can never be left inconsistent.
//! Drained frames still get their timing recorded, accepting some skew.

use std::collections::HashMap;

use crate::ident::FnId;

/// One active (not yet exited) call on a thread's stack.
#[derive(Debug, Clone, Copy)]
struct CallFrame {
    id: FnId,
    start_ns: u64,
    /// Inclusive time of completed direct children, accumulated so the
    /// parent's exclusive time can subtract it on exit.
    child_ns: u64,
}

/// Running totals for one function on one thread (or, after merging,
/// across all threads).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnStats {
    pub calls: u64,
    pub incl_ns: u64,
    pub excl_ns: u64,
    pub max_incl_ns: u64,
}

impl FnStats {
    fn record(&mut self, incl_ns: u64, excl_ns: u64) {
        self.calls += 1;
        self.incl_ns += incl_ns;
        self.excl_ns += excl_ns;
        if incl_ns > self.max_incl_ns {
            self.max_incl_ns = incl_ns;
        }
    }

    /// Fold another function's totals into this one (thread-teardown merge).
    pub(crate) fn absorb(&mut self, other: &FnStats) {
        self.calls += other.calls;
        self.incl_ns += other.incl_ns;
        self.excl_ns += other.excl_ns;
        self.max_incl_ns = self.max_incl_ns.max(other.max_incl_ns);
    }
}

/// Per-thread summary state. Exclusively owned by its thread.
#[derive(Debug, Default)]
pub struct SummaryCollector {
    stack: Vec<CallFrame>,
    local: HashMap<FnId, FnStats>,
}

impl SummaryCollector {
    pub fn new() -> Self {
        SummaryCollector::default()
    }

    /// Record a function entry observed at `t` (nanoseconds).
    pub fn on_enter_at(&mut self, id: FnId, t: u64) {
        self.stack.push(CallFrame {
            id,
            start_ns: t,
            child_ns: 0,
        });
    }

    /// Record a function exit observed at `t`, draining unmatched frames.
    ///
    /// Each popped frame contributes `inclusive = t - start` and
    /// `exclusive = inclusive - child` (clamped at zero) to its function's
    /// totals, and charges its inclusive time to the frame below it.
    /// Draining stops at the frame whose identity matches `id`, or when the
    /// stack is empty. An exit with no frame on the stack is ignored.
    pub fn on_exit_at(&mut self, id: FnId, t: u64) {
        while let Some(frame) = self.stack.pop() {
            let incl = t.saturating_sub(frame.start_ns);
            let excl = incl.saturating_sub(frame.child_ns);
            self.local.entry(frame.id).or_default().record(incl, excl);
            if let Some(parent) = self.stack.last_mut() {
                parent.child_ns += incl;
            }
            if frame.id == id {
                break;
            }
        }
    }

    /// Number of frames currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// A function's locally accumulated totals, if it completed any call
    /// on this thread.
    pub fn stats(&self, id: FnId) -> Option<FnStats> {
        self.local.get(&id).copied()
    }

    /// Move every local entry into `global`, leaving the local table empty.
    /// The caller holds the global table's lock; this runs once per thread.
    pub(crate) fn merge_into(&mut self, global: &mut HashMap<FnId, FnStats>) {
        for (id, stats) in self.local.drain() {
            global.entry(id).or_default().absorb(&stats);
        }
    }
}
