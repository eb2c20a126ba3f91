//! Ambient entry points for instrumented programs.
//!
//! Rewritten code cannot thread a [`Session`] handle through every call,
//! so this module keeps one installed process-wide session plus a lazily
//! created per-thread [`ThreadContext`]. Everything here degrades to a
//! no-op when no session is installed, when a hook fires re-entrantly, or
//! when thread-local storage is already tearing down.

use std::cell::{Cell, RefCell};
use std::sync::{Arc, OnceLock};

use crate::config::Config;
use crate::context::ThreadContext;
use crate::ident::{CallSite, FnId};
use crate::session::Session;

static GLOBAL: OnceLock<Arc<Session>> = OnceLock::new();

enum Slot {
    Idle,
    Active(ThreadContext),
    /// The thread already handed its data over; never trace here again,
    /// or an event log could be reopened and truncated.
    Done,
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
    static CONTEXT: RefCell<Slot> = const { RefCell::new(Slot::Idle) };
}

/// Install the process-wide session from the environment. The first call
/// wins; later calls return the already installed session.
pub fn init() -> Arc<Session> {
    init_with(Config::from_env())
}

/// Install the process-wide session from an explicit configuration.
pub fn init_with(config: Config) -> Arc<Session> {
    Arc::clone(GLOBAL.get_or_init(|| Session::init(config)))
}

/// The installed session, if any.
pub fn session() -> Option<Arc<Session>> {
    GLOBAL.get().cloned()
}

/// Make a function visible in the summary report even if it is never
/// called. No-op until a session is installed.
pub fn register(name: &str) {
    if let Some(session) = GLOBAL.get() {
        session.register(name);
    }
}

/// Records the matching exit when dropped.
#[must_use = "dropping the guard records the function exit"]
pub struct Guard {
    id: Option<FnId>,
}

/// Record a function entry and return the guard that will record its
/// exit. Inert when no session is installed.
pub fn trace(site: &'static CallSite) -> Guard {
    let Some(session) = GLOBAL.get() else {
        return Guard { id: None };
    };
    let id = site.id_or_intern(|name| session.intern(name));
    with_context(|ctx| ctx.on_enter(id));
    Guard { id: Some(id) }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            with_context(|ctx| ctx.on_exit(id));
        }
    }
}

/// Hand the current thread's data to the session and retire its context.
/// Runs automatically at thread exit for threads that never call it.
pub fn thread_finish() {
    let _ = CONTEXT.try_with(|slot| {
        if let Ok(mut slot) = slot.try_borrow_mut() {
            if let Slot::Active(ctx) = &mut *slot {
                ctx.finish();
            }
            *slot = Slot::Done;
        }
    });
}

/// Finish the calling thread, then finalize the installed session. Meant
/// to run once on the main thread, after the traced work is done.
pub fn shutdown() {
    thread_finish();
    if let Some(session) = GLOBAL.get() {
        session.shutdown();
    }
}

fn with_context(f: impl FnOnce(&mut ThreadContext)) {
    let _ = IN_HOOK.try_with(|flag| {
        if flag.get() {
            return;
        }
        flag.set(true);
        let _ = CONTEXT.try_with(|slot| {
            let Ok(mut slot) = slot.try_borrow_mut() else {
                return;
            };
            if let Slot::Idle = *slot
                && let Some(session) = GLOBAL.get()
            {
                *slot = Slot::Active(ThreadContext::new(Arc::clone(session)));
            }
            if let Slot::Active(ctx) = &mut *slot {
                f(ctx);
            }
        });
        flag.set(false);
    });
}
