//! Build-time instrumentation profiler for Rust binaries.
//!
//! This library hosts the pipeline behind the `fprof` CLI: target
//! resolution, source rewriting, staging and building, and report loading
//! and formatting. The timing itself lives in `fprof-runtime`, which
//! instrumented binaries link against.

pub mod build;
pub mod error;
pub mod report;
pub mod resolve;
pub mod rewrite;
