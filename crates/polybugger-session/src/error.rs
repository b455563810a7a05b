//! Session error types.

use thiserror::Error;

use polybugger_adapters::AdapterError;
use polybugger_dap::DapError;

use crate::state::SessionState;

/// Errors from session operations.
///
/// Non-terminal errors leave the session state unchanged; the caller can
/// retry or correct the request.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The operation is not valid in the session's current state.
    #[error("{operation} requires state {required}, session is {current}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session is in.
        current: SessionState,
        /// Human-readable description of the accepted states.
        required: &'static str,
    },

    /// A request parameter is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced thread, frame, or watch does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No response from the adapter within the deadline.
    #[error("request timed out: {command}")]
    Timeout {
        /// The command that timed out.
        command: String,
    },

    /// The request was cancelled (session terminating).
    #[error("request cancelled")]
    Cancelled,

    /// The adapter connection is gone.
    #[error("adapter disconnected")]
    Disconnected,

    /// The adapter rejected the request; the message passes through
    /// unmodified.
    #[error("adapter error on '{command}': {message}")]
    AdapterError {
        /// The command that failed.
        command: String,
        /// The adapter's message.
        message: String,
    },

    /// The adapter profile rejected the configuration.
    #[error(transparent)]
    Profile(#[from] AdapterError),

    /// Transport-level failure (spawn, framing, I/O).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl SessionError {
    /// Stable error kind tag used by the front surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::InvalidState { .. } => "failed_precondition",
            SessionError::InvalidArgument(_) => "invalid_argument",
            SessionError::NotFound(_) => "not_found",
            SessionError::Timeout { .. } => "timeout",
            SessionError::Cancelled => "cancelled",
            SessionError::Disconnected => "disconnected",
            SessionError::AdapterError { .. } => "adapter_error",
            SessionError::Profile(_) => "invalid_argument",
            SessionError::Transport(_) => "io_error",
        }
    }

    /// The DAP command involved, when there is one.
    pub fn command(&self) -> Option<&str> {
        match self {
            SessionError::Timeout { command } => Some(command),
            SessionError::AdapterError { command, .. } => Some(command),
            _ => None,
        }
    }
}

impl From<DapError> for SessionError {
    fn from(err: DapError) -> Self {
        match err {
            DapError::Timeout { command } => SessionError::Timeout { command },
            DapError::AdapterError { command, message } => {
                SessionError::AdapterError { command, message }
            }
            DapError::Disconnected => SessionError::Disconnected,
            DapError::Cancelled { .. } => SessionError::Cancelled,
            DapError::SpawnFailed(msg) => SessionError::Transport(msg),
            DapError::MalformedFrame(msg) => SessionError::Transport(msg),
            DapError::InvalidResponse(msg) => SessionError::Transport(msg),
            DapError::Io(e) => SessionError::Transport(e.to_string()),
        }
    }
}
