use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for the analysis pipeline and the sweep harness.
///
/// Every variant carries enough context to be actionable when it is logged at the
/// harness boundary. Ambiguous collisions are dropped inside the classifier and never
/// surface as errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A header field is missing, unparseable, or carries an unknown tag.
    #[error("malformed header at line {line}: {reason}")]
    MalformedHeader { line: usize, reason: String },

    /// A record line in a frame or event stream could not be interpreted.
    #[error("malformed {stream} record at line {line}: {reason}")]
    MalformedRecord {
        stream: &'static str,
        line: usize,
        reason: String,
    },

    /// The number of records present differs from what the header declared.
    #[error("{stream}: declared {declared} {what} but found {found}")]
    RecordCountMismatch {
        stream: &'static str,
        what: &'static str,
        declared: usize,
        found: usize,
    },

    /// The external simulator exited unsuccessfully.
    #[error("simulator exited with {status}: {stderr}")]
    SimulatorProcessFailure { status: String, stderr: String },

    /// A job directory is missing one of the files the analysis needs.
    #[error("missing simulator output: {0}")]
    MissingOutput(PathBuf),

    /// A job panicked while launching or analyzing; the payload message is kept.
    #[error("job panicked: {0}")]
    JobPanicked(String),

    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The worker pool could not be built.
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Propagated I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Propagated JSON (de)serialization errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
