use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// One profiling report loaded from a CSV file written by fprof-runtime.
#[derive(Debug)]
pub struct Report {
    /// Millisecond timestamp parsed from the file name, 0 if absent.
    pub timestamp_ms: u128,
    pub entries: Vec<ReportEntry>,
}

/// Timing data for one function within a report.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub module: String,
    pub function: String,
    pub calls: u64,
    pub total_incl_ns: u64,
    pub total_excl_ns: u64,
    pub avg_incl_ns: f64,
    pub avg_excl_ns: f64,
    pub max_incl_ns: u64,
}

/// Read a profiling report from a CSV file on disk.
pub fn load_report(path: &Path) -> Result<Report, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let mut lines = contents.lines();
    let header = lines.next().unwrap_or("");
    if !header.starts_with("module,function") {
        return Err(invalid(path, "missing module,function header".to_string()));
    }

    let mut entries = Vec::new();
    for (idx, line) in lines.enumerate() {
        if line.is_empty() {
            continue;
        }
        // Header is line 1, so data starts at line 2.
        entries.push(parse_entry(line, path, idx + 2)?);
    }

    let timestamp_ms = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(Report {
        timestamp_ms,
        entries,
    })
}

fn invalid(path: &Path, reason: String) -> Error {
    Error::InvalidReport {
        path: path.to_path_buf(),
        reason,
    }
}

fn parse_entry(line: &str, path: &Path, line_no: usize) -> Result<ReportEntry, Error> {
    let fields = split_csv_line(line);
    if fields.len() != 8 {
        return Err(invalid(
            path,
            format!("line {line_no}: expected 8 fields, got {}", fields.len()),
        ));
    }

    let int = |idx: usize| -> Result<u64, Error> {
        fields[idx].parse().map_err(|_| {
            invalid(
                path,
                format!("line {line_no}: bad integer in column {}", idx + 1),
            )
        })
    };
    let float = |idx: usize| -> Result<f64, Error> {
        fields[idx].parse().map_err(|_| {
            invalid(
                path,
                format!("line {line_no}: bad number in column {}", idx + 1),
            )
        })
    };

    Ok(ReportEntry {
        module: fields[0].clone(),
        function: fields[1].clone(),
        calls: int(2)?,
        total_incl_ns: int(3)?,
        total_excl_ns: int(4)?,
        avg_incl_ns: float(5)?,
        avg_excl_ns: float(6)?,
        max_incl_ns: int(7)?,
    })
}

/// Split one CSV line into fields, honoring quoted fields with doubled
/// quotes as the escape.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}

/// Format a report as a text table sorted by exclusive time descending.
///
/// Rows with zero calls (registered but never executed) are hidden unless
/// `show_all` is set.
pub fn format_table(report: &Report, show_all: bool) -> String {
    let mut entries = report.entries.clone();
    entries.sort_by(|a, b| b.total_excl_ns.cmp(&a.total_excl_ns));

    let hidden = entries.iter().filter(|e| e.calls == 0).count();
    if !show_all {
        entries.retain(|e| e.calls > 0);
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<40} {:>8} {:>10} {:>10} {:>10}\n",
        "Function", "Calls", "Total", "Self", "Max"
    ));
    out.push_str(&format!("{}\n", "-".repeat(82)));

    for entry in &entries {
        out.push_str(&format!(
            "{:<40} {:>8} {:>9.2}ms {:>9.2}ms {:>9.2}ms\n",
            entry.function,
            entry.calls,
            entry.total_incl_ns as f64 / 1e6,
            entry.total_excl_ns as f64 / 1e6,
            entry.max_incl_ns as f64 / 1e6,
        ));
    }

    if !show_all && hidden > 0 {
        out.push_str(&format!(
            "\n{hidden} function(s) with zero calls hidden (pass --all to show)\n"
        ));
    }
    out
}

/// Show the delta between two reports, comparing functions by name.
pub fn diff_reports(a: &Report, b: &Report) -> String {
    let a_map: HashMap<&str, &ReportEntry> =
        a.entries.iter().map(|e| (e.function.as_str(), e)).collect();
    let b_map: HashMap<&str, &ReportEntry> =
        b.entries.iter().map(|e| (e.function.as_str(), e)).collect();

    // Collect all function names, sorted for deterministic output.
    let mut names: Vec<&str> = a_map.keys().chain(b_map.keys()).copied().collect();
    names.sort_unstable();
    names.dedup();

    let mut out = String::new();
    out.push_str(&format!(
        "{:<40} {:>10} {:>10} {:>10}\n",
        "Function", "Before", "After", "Delta"
    ));
    out.push_str(&format!("{}\n", "-".repeat(74)));

    for name in &names {
        let before = a_map.get(name).map_or(0.0, |e| e.total_excl_ns as f64 / 1e6);
        let after = b_map.get(name).map_or(0.0, |e| e.total_excl_ns as f64 / 1e6);
        let delta = after - before;
        out.push_str(&format!(
            "{:<40} {:>9.2}ms {:>9.2}ms {:>+9.2}ms\n",
            name, before, after, delta
        ));
    }
    out
}

/// Find the most recent report in a directory by parsing timestamps from
/// filenames.
///
/// Reports are named `<timestamp_ms>.csv`. This function parses the stem as
/// a millisecond timestamp and returns the path with the highest one.
pub fn latest_report(reports_dir: &Path) -> Result<PathBuf, Error> {
    let entries: Vec<PathBuf> = std::fs::read_dir(reports_dir)
        .map_err(|source| Error::ReadError {
            path: reports_dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                return None;
            }
            let _ts: u128 = path.file_stem()?.to_str()?.parse().ok()?;
            Some(path)
        })
        .collect();

    if entries.is_empty() {
        return Err(Error::NoReports);
    }

    entries
        .into_iter()
        .max_by_key(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u128>().ok())
                .unwrap_or(0)
        })
        .ok_or(Error::NoReports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_csv() -> &'static str {
        "module,function,calls,total_inclusive_ns,total_exclusive_ns,\
         avg_inclusive_ns,avg_exclusive_ns,max_inclusive_ns\n\
         target/debug/demo,parse,100,45000000,30100000,450000,301000,900000\n\
         target/debug/demo,walk,3,10500000,7200000,3500000,2400000,5000000\n"
    }

    fn entry(function: &str, calls: u64, total_ns: u64, self_ns: u64) -> ReportEntry {
        ReportEntry {
            module: "demo".into(),
            function: function.into(),
            calls,
            total_incl_ns: total_ns,
            total_excl_ns: self_ns,
            avg_incl_ns: 0.0,
            avg_excl_ns: 0.0,
            max_incl_ns: total_ns,
        }
    }

    #[test]
    fn load_report_from_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1700000000000.csv");
        fs::write(&path, sample_csv()).unwrap();

        let report = load_report(&path).unwrap();
        assert_eq!(report.timestamp_ms, 1700000000000);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].function, "parse");
        assert_eq!(report.entries[0].calls, 100);
        assert_eq!(report.entries[0].total_incl_ns, 45_000_000);
        assert_eq!(report.entries[0].total_excl_ns, 30_100_000);
        assert!((report.entries[0].avg_incl_ns - 450_000.0).abs() < f64::EPSILON);
        assert_eq!(report.entries[1].max_incl_ns, 5_000_000);
    }

    #[test]
    fn load_report_rejects_missing_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.csv");
        fs::write(&path, "demo,walk,3,1,1,1,1,1\n").unwrap();

        let err = load_report(&path).unwrap_err();
        assert!(
            err.to_string().contains("invalid report data"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_report_rejects_short_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.csv");
        fs::write(
            &path,
            "module,function,calls,total_inclusive_ns,total_exclusive_ns,\
             avg_inclusive_ns,avg_exclusive_ns,max_inclusive_ns\n\
             demo,walk,3\n",
        )
        .unwrap();

        let err = load_report(&path).unwrap_err();
        assert!(
            err.to_string().contains("expected 8 fields"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn quoted_fields_are_unescaped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1.csv");
        fs::write(
            &path,
            "module,function,calls,total_inclusive_ns,total_exclusive_ns,\
             avg_inclusive_ns,avg_exclusive_ns,max_inclusive_ns\n\
             \"target/my,app\",\"say \"\"hi\"\"\",1,5,5,5,5,5\n",
        )
        .unwrap();

        let report = load_report(&path).unwrap();
        assert_eq!(report.entries[0].module, "target/my,app");
        assert_eq!(report.entries[0].function, "say \"hi\"");
    }

    #[test]
    fn format_table_sorts_by_self_time() {
        let report = Report {
            timestamp_ms: 1000,
            entries: vec![
                entry("fast", 1, 2_000_000, 1_000_000),
                entry("slow", 1, 20_000_000, 15_000_000),
            ],
        };
        let table = format_table(&report, false);
        let slow_pos = table.find("slow").expect("slow not in table");
        let fast_pos = table.find("fast").expect("fast not in table");
        assert!(
            slow_pos < fast_pos,
            "slow (self 15ms) should appear before fast (self 1ms)"
        );
        assert!(table.contains("15.00ms"), "table: {table}");
    }

    #[test]
    fn format_table_hides_zero_call_rows() {
        let report = Report {
            timestamp_ms: 1000,
            entries: vec![entry("walk", 3, 10, 10), entry("never_ran", 0, 0, 0)],
        };

        let table = format_table(&report, false);
        assert!(!table.contains("never_ran"), "table: {table}");
        assert!(table.contains("hidden"), "table: {table}");

        let full = format_table(&report, true);
        assert!(full.contains("never_ran"), "table: {full}");
        assert!(!full.contains("hidden"), "table: {full}");
    }

    #[test]
    fn diff_shows_delta() {
        let a = Report {
            timestamp_ms: 1000,
            entries: vec![entry("walk", 3, 12_000_000, 10_000_000)],
        };
        let b = Report {
            timestamp_ms: 2000,
            entries: vec![entry("walk", 3, 9_000_000, 8_000_000)],
        };
        let diff = diff_reports(&a, &b);
        assert!(diff.contains("walk"), "should mention walk");
        assert!(diff.contains("-2.00"), "should show negative delta: {diff}");
    }

    #[test]
    fn latest_report_finds_most_recent_by_timestamp() {
        let dir = TempDir::new().unwrap();
        for name in [
            "1700000000000.csv",
            "1700000002000.csv",
            "1700000001500.csv",
        ] {
            fs::write(dir.path().join(name), "module,function\n").unwrap();
        }
        let latest = latest_report(dir.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "1700000002000.csv");
    }

    #[test]
    fn latest_report_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1700000000000.csv"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("summary.csv"), "").unwrap();

        let latest = latest_report(dir.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "1700000000000.csv");
    }

    #[test]
    fn latest_report_errors_on_empty_dir() {
        let dir = TempDir::new().unwrap();
        let result = latest_report(dir.path());
        assert!(result.is_err(), "expected Err for empty dir");
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("no reports found"),
            "unexpected error: {err}"
        );
    }
}
