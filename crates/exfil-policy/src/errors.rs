//! Policy engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building policy resources.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A filter list could not be read.
    #[error("failed to read filter list {path}: {source}")]
    FilterListRead {
        /// The list that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
