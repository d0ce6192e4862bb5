// src/error.rs

//! Error types for the aptly core
//!
//! A single crate-wide error enum. Variants follow the failure classes the
//! core distinguishes between: malformed input (`SyntaxError`,
//! `ParseError`), missing metadata (`NotFoundError`, `LoadError`), unusable
//! configuration (`ConfigurationError`), integrity failures
//! (`ChecksumMismatch`) and the aggregated partial failure of a mirror
//! download run (`DownloadFailed`).

use std::fmt;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the aptly core
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed query text
    #[error("syntax error at position {position}: {message}")]
    SyntaxError { position: usize, message: String },

    /// Malformed version or dependency string
    #[error("parse error: {0}")]
    ParseError(String),

    /// Unknown key or name
    #[error("not found: {0}")]
    NotFoundError(String),

    /// A reference list points at a package the metadata collection lacks
    #[error("unable to load package {key}: {source}")]
    LoadError {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// The operation cannot proceed with the given configuration
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Downloaded or pooled content does not match its expected checksum
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Transport level download failure
    #[error("download error: {0}")]
    DownloadError(String),

    /// IO failure with context
    #[error("IO error: {0}")]
    IoError(String),

    /// Raw IO failure
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Storage failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another process is updating the mirror
    #[error("mirror {name} is locked by update process {pid}")]
    MirrorLocked { name: String, pid: u32 },

    /// The run was cancelled before completion
    #[error("operation cancelled")]
    Cancelled,

    /// One or more download tasks failed after exhausting their retries
    #[error("download failed for {} file(s):\n{}", .0.len(), DisplayFailures(.0))]
    DownloadFailed(Vec<TaskFailure>),
}

impl Error {
    /// Whether a download task hitting this error should be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DownloadError(_)
                | Error::ChecksumMismatch { .. }
                | Error::IoError(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// A download task that failed permanently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Package the file belongs to
    pub package: String,
    /// Source URL
    pub url: String,
    /// Last error observed for the task
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.package, self.url, self.error)
    }
}

struct DisplayFailures<'a>(&'a [TaskFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", failure)?;
        }
        Ok(())
    }
}
