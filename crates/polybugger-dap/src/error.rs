//! DAP error types.

use thiserror::Error;

/// Errors from DAP transport and client operations.
#[derive(Debug, Error)]
pub enum DapError {
    /// Adapter process failed to start.
    #[error("adapter failed to start: {0}")]
    SpawnFailed(String),

    /// A frame on the wire violated the Content-Length framing rules.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Request timed out waiting for a response.
    #[error("request timed out: {command}")]
    Timeout {
        /// The command that timed out.
        command: String,
    },

    /// The adapter answered the request with `success: false`.
    #[error("adapter error on '{command}': {message}")]
    AdapterError {
        /// The command that failed.
        command: String,
        /// The adapter's error message, passed through verbatim.
        message: String,
    },

    /// The connection to the adapter is gone; no further requests possible.
    #[error("adapter disconnected")]
    Disconnected,

    /// The request was cancelled before a response arrived.
    #[error("request cancelled: {command}")]
    Cancelled {
        /// The command that was cancelled.
        command: String,
    },

    /// The adapter sent a response that could not be interpreted.
    #[error("adapter sent invalid response: {0}")]
    InvalidResponse(String),

    /// Underlying I/O failure on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
