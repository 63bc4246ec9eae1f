//! The primary error type for all operations in the `unxip` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the extraction pipeline.
///
/// Fatal kinds (`MalformedArchive`, `Decode`, `Cancelled`) abort the whole run.
/// Per-file `Io` errors encountered while materializing a single entry are
/// swallowed by the scheduler (logged, not propagated) — see [`crate::scheduler`].
#[derive(Debug, Error)]
pub enum UnxipError {
    /// The archive's container framing (XAR header, TOC, PBZX, or CPIO header)
    /// does not match the expected layout.
    #[error("malformed archive: {reason}")]
    MalformedArchive { reason: String },

    /// A compression codec failed or produced an unexpected output size.
    #[error("{stage} decode failed: {message}")]
    Decode { stage: &'static str, message: String },

    /// A filesystem syscall failed while materializing a path.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cooperative cancellation was observed at a task checkpoint.
    #[error("extraction cancelled")]
    Cancelled,
}

impl UnxipError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        UnxipError::MalformedArchive { reason: reason.into() }
    }

    pub fn decode(stage: &'static str, message: impl Into<String>) -> Self {
        UnxipError::Decode { stage, message: message.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UnxipError::Io { path: path.into(), source }
    }
}

/// Convenience alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, UnxipError>;
