//! Summary-report assembly and CSV output.
//!
//! Rows are snapshotted from the shared table under its lock, resolved to
//! module and function names, then sorted by descending total exclusive
//! time so the report reads hottest-first. The sort is stable, so ties
//! keep a deterministic order across runs of the same table.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Write};

use crate::session::Session;
use crate::symbols;

/// One line of the summary report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub module: String,
    pub function: String,
    pub calls: u64,
    pub incl_ns: u64,
    pub excl_ns: u64,
    pub max_incl_ns: u64,
}

impl ReportRow {
    /// Mean inclusive time per call, zero when nothing was called.
    pub fn avg_incl_ns(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.incl_ns as f64 / self.calls as f64
        }
    }

    pub fn avg_excl_ns(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.excl_ns as f64 / self.calls as f64
        }
    }
}

pub(crate) fn snapshot_rows(session: &Session) -> Vec<ReportRow> {
    let names = session.names_snapshot();
    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut rows: Vec<ReportRow> = {
        let stats = session.lock_stats();
        stats
            .iter()
            .map(|(&id, s)| {
                let sym = symbols::resolve(id, &names, &exe);
                ReportRow {
                    module: sym.module,
                    function: sym.name,
                    calls: s.calls,
                    incl_ns: s.incl_ns,
                    excl_ns: s.excl_ns,
                    max_incl_ns: s.max_incl_ns,
                }
            })
            .collect()
    };
    rows.sort_by(|a, b| b.excl_ns.cmp(&a.excl_ns));
    rows
}

/// Write rows as CSV, header first. Averages are printed as whole
/// nanoseconds.
pub fn write_csv<W: Write>(out: &mut W, rows: &[ReportRow]) -> io::Result<()> {
    writeln!(
        out,
        "module,function,calls,total_inclusive_ns,total_exclusive_ns,\
         avg_inclusive_ns,avg_exclusive_ns,max_inclusive_ns"
    )?;
    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{:.0},{:.0},{}",
            csv_field(&row.module),
            csv_field(&row.function),
            row.calls,
            row.incl_ns,
            row.excl_ns,
            row.avg_incl_ns(),
            row.avg_excl_ns(),
            row.max_incl_ns
        )?;
    }
    Ok(())
}

/// Emit the report to the configured path, or to stderr when no path is
/// set or the file cannot be opened.
pub(crate) fn emit(session: &Session) {
    let rows = snapshot_rows(session);
    match session.config().report_path.as_deref() {
        Some(path) => match File::create(path) {
            Ok(mut file) => {
                if let Err(e) = write_csv(&mut file, &rows) {
                    eprintln!(
                        "fprof-runtime: failed writing report to {}: {e}",
                        path.display()
                    );
                }
            }
            Err(e) => {
                eprintln!(
                    "fprof-runtime: cannot open {}: {e}; report goes to stderr",
                    path.display()
                );
                let _ = write_csv(&mut io::stderr().lock(), &rows);
            }
        },
        None => {
            let _ = write_csv(&mut io::stderr().lock(), &rows);
        }
    }
}

/// Quote a field only when it holds a delimiter, a quote, or a newline;
/// inner quotes are doubled.
fn csv_field(s: &str) -> Cow<'_, str> {
    if !s.contains([',', '"', '\n']) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(format!("\"{}\"", s.replace('"', "\"\"")))
}
