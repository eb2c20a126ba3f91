use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use fprof::build::{
    build_instrumented, find_bin_entry_point, find_project_root, find_workspace_root,
    inject_runtime_dependency, inject_runtime_path_dependency, prepare_staging,
};
use fprof::error::Error;
use fprof::report::{diff_reports, format_table, latest_report, load_report};
use fprof::resolve::{TargetSpec, resolve_targets};
use fprof::rewrite::{inject_lifecycle, inject_registrations, instrument_source};

#[derive(Parser)]
#[command(
    name = "fprof",
    about = "Function-level instrumentation profiling for Rust",
    version,
    after_help = "Workflow: fprof profile [OPTIONS] (or: fprof build, fprof run, fprof report)\n\
                  Set FPROF_MODE=events to capture per-thread event logs instead of a summary."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Instrument and build the project. Profiles all functions by default;
    /// use --fn, --file, or --mod to narrow scope.
    Build {
        /// Instrument functions whose name contains PATTERN (repeatable).
        /// e.g. --fn parse matches parse, parse_line, MyStruct::try_parse.
        #[arg(long = "fn", value_name = "PATTERN")]
        fn_patterns: Vec<String>,

        /// Instrument all functions in a file (repeatable).
        #[arg(long = "file", value_name = "PATH")]
        file_patterns: Vec<PathBuf>,

        /// Instrument all functions in a module (repeatable).
        #[arg(long = "mod", value_name = "NAME")]
        mod_patterns: Vec<String>,

        /// Project root (defaults to current directory).
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Path to fprof-runtime source (for development before publishing).
        #[arg(long)]
        runtime_path: Option<PathBuf>,
    },
    /// Execute the last-built instrumented binary.
    /// Pass arguments to the binary after --.
    Run {
        /// Capture per-thread event logs instead of a summary
        /// (sets FPROF_MODE=events for the child).
        #[arg(long)]
        events: bool,

        /// Write the summary report to this path (sets FPROF_OUT).
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Write event logs into this directory (sets FPROF_DIR).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Write each event record as it happens (sets FPROF_UNBUFFERED=1).
        #[arg(long)]
        unbuffered: bool,

        /// Arguments to pass to the instrumented binary (after --).
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Build, execute, and report in one step.
    /// Pass arguments to the binary after --.
    Profile {
        /// Instrument functions whose name contains PATTERN (repeatable).
        /// e.g. --fn parse matches parse, parse_line, MyStruct::try_parse.
        #[arg(long = "fn", value_name = "PATTERN")]
        fn_patterns: Vec<String>,

        /// Instrument all functions in a file (repeatable).
        #[arg(long = "file", value_name = "PATH")]
        file_patterns: Vec<PathBuf>,

        /// Instrument all functions in a module (repeatable).
        #[arg(long = "mod", value_name = "NAME")]
        mod_patterns: Vec<String>,

        /// Project root (defaults to current directory).
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Path to fprof-runtime source (for development before publishing).
        #[arg(long)]
        runtime_path: Option<PathBuf>,

        /// Show all functions, including those with zero calls.
        #[arg(long)]
        all: bool,

        /// Suppress warning when program exits with non-zero code.
        #[arg(long)]
        ignore_exit_code: bool,

        /// Arguments to pass to the instrumented binary (after --).
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Show the latest profiling report (or a specific one).
    Report {
        /// Path to a specific report file. If omitted, shows the latest.
        report: Option<PathBuf>,

        /// Show all functions, including those with zero calls.
        #[arg(long)]
        all: bool,
    },
    /// Compare two profiling reports.
    Diff {
        /// First report file.
        a: PathBuf,
        /// Second report file.
        b: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Build {
            fn_patterns,
            file_patterns,
            mod_patterns,
            project,
            runtime_path,
        } => cmd_build(fn_patterns, file_patterns, mod_patterns, project, runtime_path),
        Commands::Run {
            events,
            out,
            dir,
            unbuffered,
            args,
        } => cmd_run(events, out, dir, unbuffered, args),
        Commands::Profile {
            fn_patterns,
            file_patterns,
            mod_patterns,
            project,
            runtime_path,
            all,
            ignore_exit_code,
            args,
        } => cmd_profile(
            fn_patterns,
            file_patterns,
            mod_patterns,
            project,
            runtime_path,
            all,
            ignore_exit_code,
            args,
        ),
        Commands::Report { report, all } => cmd_report(report, all),
        Commands::Diff { a, b } => cmd_diff(a, b),
    }
}

/// Build an instrumented binary and return (binary_path, reports_dir).
fn build_project(
    fn_patterns: Vec<String>,
    file_patterns: Vec<PathBuf>,
    mod_patterns: Vec<String>,
    project: PathBuf,
    runtime_path: Option<PathBuf>,
) -> Result<(PathBuf, PathBuf), Error> {
    // Walk up from --project (default ".") so the tool works from any
    // subdirectory of the target project.
    let project = find_project_root(&project)?;

    // Build target specs from CLI args.
    let mut specs: Vec<TargetSpec> = Vec::new();
    for p in fn_patterns {
        specs.push(TargetSpec::Fn(p));
    }
    for p in file_patterns {
        specs.push(TargetSpec::File(p));
    }
    for m in mod_patterns {
        specs.push(TargetSpec::Mod(m));
    }

    // Resolve targets against the project source.
    let src_dir = project.join("src");
    if !src_dir.is_dir() {
        return Err(Error::BuildFailed(format!(
            "no src/ directory found in {} -- is this a Rust project?",
            project.display()
        )));
    }
    let targets = resolve_targets(&src_dir, &specs)?;

    let total_fns: usize = targets.iter().map(|t| t.functions.len()).sum();
    eprintln!(
        "found {} function(s) across {} file(s)",
        total_fns,
        targets.len()
    );
    const INSTRUMENT_ALL_WARN_THRESHOLD: usize = 200;
    if specs.is_empty() && total_fns > INSTRUMENT_ALL_WARN_THRESHOLD {
        eprintln!(
            "warning: instrumenting {total_fns} functions may add overhead -- \
             use --fn, --file, or --mod to narrow scope"
        );
    }
    for target in &targets {
        let relative = target.file.strip_prefix(&src_dir).unwrap_or(&target.file);
        eprintln!("  {}:", relative.display());
        for f in &target.functions {
            eprintln!("    {f}");
        }
    }

    // Detect workspace membership. If the project is a workspace member,
    // stage from the workspace root so inherited fields and cross-member
    // path dependencies resolve correctly.
    let workspace_root = find_workspace_root(&project);
    let (staging_root, member_subdir, package_name) = if let Some(ref ws_root) = workspace_root {
        let relative = project
            .strip_prefix(ws_root)
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .to_path_buf();
        // Read package name from the member's Cargo.toml.
        let member_toml = std::fs::read_to_string(project.join("Cargo.toml"))?;
        let doc: toml_edit::DocumentMut = member_toml
            .parse()
            .map_err(|e| Error::BuildFailed(format!("failed to parse member Cargo.toml: {e}")))?;
        let pkg_name = doc
            .get("package")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::BuildFailed("member Cargo.toml missing package.name".into()))?
            .to_string();
        (ws_root.clone(), Some(relative), Some(pkg_name))
    } else {
        (project.clone(), None, None)
    };

    // Prepare staging directory.
    let staging = tempfile::tempdir()?;
    prepare_staging(&staging_root, staging.path())?;

    // Determine the member directory within staging (workspace root for standalone).
    let member_staging = match &member_subdir {
        Some(sub) => staging.path().join(sub),
        None => staging.path().to_path_buf(),
    };

    // Inject fprof-runtime dependency.
    match runtime_path {
        Some(ref path) => {
            let abs_path = std::fs::canonicalize(path)?;
            inject_runtime_path_dependency(&member_staging, &abs_path)?;
        }
        None => {
            inject_runtime_dependency(&member_staging, env!("FPROF_RUNTIME_VERSION"))?;
        }
    }

    // Rewrite each target file in staging.
    for target in &targets {
        let target_set: HashSet<String> = target.functions.iter().cloned().collect();
        let relative = target.file.strip_prefix(&src_dir).unwrap_or(&target.file);
        let staged_file = member_staging.join("src").join(relative);
        let display_path = PathBuf::from("src").join(relative);
        let source = std::fs::read_to_string(&staged_file).map_err(|source| Error::ReadError {
            path: display_path.clone(),
            source,
        })?;

        let rewritten =
            instrument_source(&source, &target_set).map_err(|source| Error::ParseError {
                path: display_path,
                source,
            })?;

        std::fs::write(&staged_file, rewritten)?;
    }

    // Rewrite the binary entry point: pre-register every instrumented
    // function, then wrap main with init/shutdown. Lifecycle goes last so
    // the registrations land after init, inside the unwind wrapper.
    let bin_entry = find_bin_entry_point(&member_staging)?;
    let main_file = member_staging.join(&bin_entry);
    let target_dir = project.join("target").join("fprof");
    let reports_dir = target_dir.join("reports");
    std::fs::create_dir_all(&reports_dir)?;
    {
        let all_fn_names: Vec<String> = targets
            .iter()
            .flat_map(|t| t.functions.iter().cloned())
            .collect();
        let main_source = std::fs::read_to_string(&main_file).map_err(|source| Error::ReadError {
            path: bin_entry.clone(),
            source,
        })?;
        let rewritten =
            inject_registrations(&main_source, &all_fn_names).map_err(|source| {
                Error::ParseError {
                    path: bin_entry.clone(),
                    source,
                }
            })?;

        let rewritten = inject_lifecycle(&rewritten).map_err(|source| Error::ParseError {
            path: bin_entry.clone(),
            source,
        })?;
        std::fs::write(&main_file, rewritten)?;
    }

    // Build the instrumented binary.
    let binary = build_instrumented(staging.path(), &target_dir, package_name.as_deref())?;

    Ok((binary, reports_dir))
}

fn cmd_build(
    fn_patterns: Vec<String>,
    file_patterns: Vec<PathBuf>,
    mod_patterns: Vec<String>,
    project: PathBuf,
    runtime_path: Option<PathBuf>,
) -> Result<(), Error> {
    let (binary, _reports_dir) =
        build_project(fn_patterns, file_patterns, mod_patterns, project, runtime_path)?;
    let display_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());
    eprintln!("built: {display_name}");
    if !std::io::stdout().is_terminal() {
        println!("{}", binary.display());
    }

    Ok(())
}

fn find_latest_binary(target_dir: &Path) -> Result<PathBuf, Error> {
    let dir = target_dir.join("debug");
    if !dir.is_dir() {
        return Err(Error::NoBinary);
    }
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Skip files with extensions (e.g. .d, .fingerprint) -- binaries have no extension on unix
        if path.extension().is_some() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if entry.metadata()?.permissions().mode() & 0o111 == 0 {
                continue; // not executable
            }
        }
        let mtime = entry.metadata()?.modified()?;
        if best.as_ref().is_none_or(|(_, t)| mtime > *t) {
            best = Some((path, mtime));
        }
    }
    best.map(|(p, _)| p).ok_or(Error::NoBinary)
}

/// Point the child's runtime output at `reports_dir` and `events_dir`
/// unless the caller already set the variables.
fn apply_runtime_env(cmd: &mut process::Command, reports_dir: &Path, events_dir: &Path) {
    if std::env::var_os("FPROF_OUT").is_none() {
        cmd.env(
            "FPROF_OUT",
            reports_dir.join(format!("{}.csv", timestamp_ms())),
        );
    }
    if std::env::var_os("FPROF_DIR").is_none() {
        cmd.env("FPROF_DIR", events_dir);
    }
}

fn timestamp_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn cmd_run(
    events: bool,
    out: Option<PathBuf>,
    dir: Option<PathBuf>,
    unbuffered: bool,
    args: Vec<String>,
) -> Result<(), Error> {
    let root = find_project_root(Path::new("."))?;
    let target_dir = root.join("target").join("fprof");
    let binary = find_latest_binary(&target_dir)?;
    eprintln!("running: {}", binary.display());

    let reports_dir = target_dir.join("reports");
    std::fs::create_dir_all(&reports_dir)?;

    let mut cmd = std::process::Command::new(&binary);
    cmd.args(&args);
    apply_runtime_env(&mut cmd, &reports_dir, &target_dir.join("events"));

    // Flags beat inherited FPROF_* variables and the defaults above.
    if events {
        cmd.env("FPROF_MODE", "events");
    }
    if let Some(out) = out {
        cmd.env("FPROF_OUT", out);
    }
    if let Some(dir) = dir {
        cmd.env("FPROF_DIR", dir);
    }
    if unbuffered {
        cmd.env("FPROF_UNBUFFERED", "1");
    }

    let status = cmd
        .status()
        .map_err(|e| Error::RunFailed(format!("failed to run {}: {e}", binary.display())))?;

    process::exit(status.code().unwrap_or(1));
}

#[allow(clippy::too_many_arguments)]
fn cmd_profile(
    fn_patterns: Vec<String>,
    file_patterns: Vec<PathBuf>,
    mod_patterns: Vec<String>,
    project: PathBuf,
    runtime_path: Option<PathBuf>,
    show_all: bool,
    ignore_exit_code: bool,
    args: Vec<String>,
) -> Result<(), Error> {
    let (binary, reports_dir) =
        build_project(fn_patterns, file_patterns, mod_patterns, project, runtime_path)?;
    let display_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string());
    eprintln!("built: {display_name}");

    let events_dir = match reports_dir.parent() {
        Some(p) => p.join("events"),
        None => PathBuf::from("target/fprof/events"),
    };

    let mut cmd = std::process::Command::new(&binary);
    cmd.args(&args);
    apply_runtime_env(&mut cmd, &reports_dir, &events_dir);

    let status = cmd
        .status()
        .map_err(|e| Error::RunFailed(format!("failed to run {}: {e}", binary.display())))?;

    if !status.success() && !ignore_exit_code {
        if let Some(code) = status.code() {
            eprintln!(
                "warning: program exited with code {code} -- profiling results may be incomplete"
            );
        } else {
            eprintln!(
                "warning: program terminated by signal -- profiling results may be incomplete"
            );
        }
    }

    // Event-mode runs produce binary logs, not a summary report.
    if std::env::var("FPROF_MODE").is_ok_and(|m| m == "events") {
        let dir = std::env::var_os("FPROF_DIR")
            .map(PathBuf::from)
            .unwrap_or(events_dir);
        eprintln!("event logs written to {}", dir.display());
        return Ok(());
    }

    // Point cmd_report at the project's reports directory so it works even
    // when CWD differs from the --project path. Skip if already set -- the
    // user or test harness may have overridden it.
    if std::env::var_os("FPROF_REPORTS_DIR").is_none() {
        // SAFETY: single-threaded CLI at this point -- no concurrent env reads.
        unsafe { std::env::set_var("FPROF_REPORTS_DIR", &reports_dir) };
    }

    eprintln!();
    match cmd_report(None, show_all) {
        Ok(()) => Ok(()),
        Err(Error::NoReports) if !status.success() && !ignore_exit_code => {
            // Program failed and produced no data. Its own error output is
            // the primary affordance; don't cascade a second error on top.
            Ok(())
        }
        Err(Error::NoReports) => {
            // Program exited successfully but no report appeared. Something
            // went wrong with the runtime's write -- give an actionable
            // message.
            Err(Error::NoDataWritten(reports_dir))
        }
        Err(e) => Err(e),
    }
}

fn cmd_report(report_path: Option<PathBuf>, show_all: bool) -> Result<(), Error> {
    let path = match report_path {
        Some(p) => p,
        None => {
            let dir = default_reports_dir()?;
            latest_report(&dir)?
        }
    };
    let report = load_report(&path)?;
    print!("{}", format_table(&report, show_all));
    Ok(())
}

fn cmd_diff(a: PathBuf, b: PathBuf) -> Result<(), Error> {
    let report_a = load_report(&a)?;
    let report_b = load_report(&b)?;
    print!("{}", diff_reports(&report_a, &report_b));
    Ok(())
}

fn default_reports_dir() -> Result<PathBuf, Error> {
    if let Ok(dir) = std::env::var("FPROF_REPORTS_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let root = find_project_root(Path::new("."))?;
    let local = root.join("target").join("fprof").join("reports");
    if local.is_dir() {
        return Ok(local);
    }
    Err(Error::NoReports)
}
