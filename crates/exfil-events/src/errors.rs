//! Event log error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from persisting or loading an event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Reading or writing the log file failed.
    #[error("event log I/O on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The log could not be encoded or decoded.
    #[error("event log JSON: {0}")]
    Json(#[from] serde_json::Error),
}
