//! Runtime support for function-call tracing.
//!
//! Instrumented programs funnel every function entry and exit through this
//! crate. Two modes share one hook surface: summary mode aggregates
//! inclusive and exclusive wall time per function and writes a CSV report
//! at teardown, event mode streams raw enter and exit records to one
//! binary log per thread for offline reconstruction.
//!
//! State is explicit. A [`Session`] owns everything process-wide and a
//! [`ThreadContext`] owns one thread's view; embedders may construct both
//! directly. The [`init`], [`trace`] and [`shutdown`] free functions wrap
//! the same objects in the ambient form that generated code uses.

#![allow(unsafe_code)]

mod clock;
mod collector;
mod config;
mod context;
mod hook;
mod ident;
mod logger;
mod report;
mod session;
mod symbols;

pub use clock::now_ns;
pub use collector::{FnStats, SummaryCollector};
pub use config::{Config, Mode};
pub use context::ThreadContext;
pub use hook::{Guard, init, init_with, register, session, shutdown, thread_finish, trace};
pub use ident::{CallSite, FnId};
pub use logger::{
    EventKind, EventWriter, FLAG_RAW_CLOCK, HEADER_SIZE, LogHeader, LogRecord, MAGIC, RECORD_SIZE,
};
pub use report::{ReportRow, write_csv};
pub use session::Session;
