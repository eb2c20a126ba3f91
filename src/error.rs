use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no functions matched {0}")]
    NoTargetsFound(String),

    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("run failed: {0}")]
    RunFailed(String),

    #[error("no instrumented binary found -- run `fprof build` first")]
    NoBinary,

    #[error("no Cargo.toml found at or above {}", .0.display())]
    NoProjectFound(PathBuf),

    #[error("no reports found -- run `fprof profile` to generate one")]
    NoReports,

    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid report data in {}: {reason}", path.display())]
    InvalidReport { path: PathBuf, reason: String },

    #[error("no report was written -- check disk space and permissions for {}", .0.display())]
    NoDataWritten(PathBuf),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
