//! Session errors and shutdown causes.

use std::path::PathBuf;

use exfil_cdp::CdpError;
use exfil_events::EventLogError;
use thiserror::Error;

use crate::instrumentation::InstrumentationError;

/// Errors raised while driving the browser.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A protocol command failed.
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// The instrumentation script could not be built.
    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),

    /// Persisting the event log failed.
    #[error(transparent)]
    EventLog(#[from] EventLogError),

    /// A reply lacked a field the session depends on.
    #[error("{method} reply has no {field}")]
    MissingField {
        /// Command whose reply was incomplete.
        method: String,
        /// Expected field.
        field: String,
    },

    /// The screenshot could not be decoded or saved.
    #[error("screenshot failed: {0}")]
    Screenshot(String),

    /// File I/O failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The root connection does not exist yet.
    #[error("session not started")]
    NotStarted,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Why a session is shutting down. `None` in its place means a normal stop.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The user interrupted the run.
    #[error("interrupted")]
    Interrupted,

    /// An event callback returned an error.
    #[error("callback for {method} failed: {message}")]
    CallbackFailed {
        /// Event method being handled.
        method: String,
        /// Error text.
        message: String,
    },

    /// An event callback panicked.
    #[error("callback for {method} panicked: {message}")]
    CallbackPanicked {
        /// Event method being handled.
        method: String,
        /// Panic payload text.
        message: String,
    },

    /// Any other fault.
    #[error("{0}")]
    Other(String),
}
