//! Error types for the PAM storage engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PamError>;

/// Unified error type for every fallible PAM operation.
///
/// Variants correspond to the error kinds a column codec, shard writer/reader,
/// planner, or pair-join iterator can raise. `IoError` and the two
/// serialization errors wrap the underlying library error directly; the rest
/// carry a message describing which invariant was violated.
#[derive(Error, Debug)]
pub enum PamError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("format error: {0}")]
    FormatError(String),

    #[error("coordinate out of range: {0}")]
    OutOfRange(String),

    #[error("missing mate for read '{0}'")]
    MissingMate(String),

    #[error("invalid options: {0}")]
    InvalidOpts(String),

    #[error("no dataset at '{0}'")]
    NoDataset(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("index error: {0}")]
    Index(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PamError {
    /// Whether this error should latch an iterator/writer permanently
    /// (no further progress is possible) as opposed to being a per-record
    /// condition the caller might recover from.
    ///
    /// Mirrors the policy table in the error-handling design: `OutOfRange`
    /// and `MissingMate` are per-record/per-call conditions; everything else
    /// indicates the underlying dataset or handle is no longer usable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PamError::OutOfRange(_) | PamError::MissingMate(_))
    }

    pub fn format(msg: impl Into<String>) -> Self {
        PamError::FormatError(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        PamError::OutOfRange(msg.into())
    }

    pub fn invalid_opts(msg: impl Into<String>) -> Self {
        PamError::InvalidOpts(msg.into())
    }
}
