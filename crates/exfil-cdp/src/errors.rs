//! Protocol client errors.

use thiserror::Error;

/// Errors from the remote debugging client.
#[derive(Debug, Error)]
pub enum CdpError {
    /// The WebSocket handshake failed.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint that refused the connection.
        url: String,
        /// Transport error text.
        reason: String,
    },

    /// The browser answered a command with an error object.
    #[error("{method} failed: {message}")]
    Protocol {
        /// Command that failed.
        method: String,
        /// `error.message` from the reply.
        message: String,
    },

    /// The connection went away before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The HTTP discovery endpoint gave no usable target.
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    /// A payload could not be encoded or decoded.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CdpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_display() {
        let err = CdpError::Protocol {
            method: "Debugger.resume".into(),
            message: "Can only perform operation while paused.".into(),
        };
        assert_eq!(
            err.to_string(),
            "Debugger.resume failed: Can only perform operation while paused."
        );
    }

    #[test]
    fn connect_display() {
        let err = CdpError::Connect {
            url: "ws://localhost:9222/devtools/page/X".into(),
            reason: "refused".into(),
        };
        assert!(err.to_string().contains("ws://localhost:9222/devtools/page/X"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn closed_display() {
        assert_eq!(CdpError::ConnectionClosed.to_string(), "connection closed");
    }

    #[test]
    fn discovery_display() {
        let err = CdpError::Discovery("no page targets".into());
        assert_eq!(err.to_string(), "endpoint discovery failed: no page targets");
    }
}
