//! Centralized error types for mailfts.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::message::MessageId;

/// All errors produced by the mailfts library.
#[derive(Error, Debug)]
pub enum FtsError {
    /// I/O error with the associated file path.
    #[error("I/O error accessing '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Error reported by the SQLite engine backing the index.
    #[error("Index database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The index file is unreadable, corrupt, or could not be (re)created.
    #[error("Corrupt or unreadable index '{path}': {reason}")]
    Schema { path: PathBuf, reason: String },

    /// An insert collided with an existing entry even after deleting it first.
    #[error("Duplicate index entry for message {0}")]
    WriteConflict(MessageId),

    /// A background job failed outside its per-message isolation.
    #[error("Job '{job}' failed: {reason}")]
    JobFailure { job: String, reason: String },

    /// The message catalog file is corrupt or was written by another version.
    #[error("Corrupt or incompatible catalog '{path}': {reason}")]
    InvalidCatalog { path: PathBuf, reason: String },

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    MimeError(String),

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, FtsError>`.
pub type Result<T> = std::result::Result<T, FtsError>;

impl FtsError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means the index file itself is damaged.
    ///
    /// Such errors are not isolated per message: they abort a worker run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Schema { .. } => true,
            Self::Database(e) => is_corruption(e),
            _ => false,
        }
    }
}

/// True for SQLite errors signalling a damaged or foreign database file.
pub(crate) fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseCorrupt) | Some(rusqlite::ErrorCode::NotADatabase)
    )
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `FtsError::io`).
impl From<std::io::Error> for FtsError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
