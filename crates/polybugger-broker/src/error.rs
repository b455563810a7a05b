//! Broker error types.

use thiserror::Error;

use polybugger_containers::ContainerError;
use polybugger_session::SessionError;

/// Errors from broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No session with that id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The registry is at capacity.
    #[error("session limit reached ({max} sessions)")]
    CapacityExceeded {
        /// The configured maximum.
        max: usize,
    },

    /// No recoverable snapshot with that id.
    #[error("no recoverable session: {0}")]
    NotRecoverable(String),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A container bridge operation failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// A persisted snapshot could not be read and was quarantined.
    #[error("corrupt session snapshot: {path}")]
    Corrupted {
        /// The quarantined file.
        path: String,
    },

    /// Filesystem failure in the persistence layer.
    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request parameter is missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl BrokerError {
    /// Stable error kind tag used by the front surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::SessionNotFound(_) | BrokerError::NotRecoverable(_) => "not_found",
            BrokerError::CapacityExceeded { .. } => "capacity_exceeded",
            BrokerError::Session(e) => e.kind(),
            BrokerError::Container(e) => match e {
                ContainerError::RuntimeUnavailable(_) => "runtime_unavailable",
                ContainerError::ContainerNotFound(_) => "container_not_found",
                ContainerError::ContainerNotRunning { .. } => "container_not_found",
                ContainerError::InjectionFailed { .. } | ContainerError::PtraceDenied { .. } => {
                    "injection_failed"
                }
                ContainerError::PortAllocationFailed(_) => "port_allocation_failed",
                ContainerError::NoProcess(_) => "not_found",
                ContainerError::AmbiguousProcess { .. } => "invalid_argument",
                ContainerError::ExecFailed { .. } | ContainerError::Io(_) => "io_error",
            },
            BrokerError::Corrupted { .. } => "corrupted",
            BrokerError::Io(_) => "io_error",
            BrokerError::InvalidArgument(_) => "invalid_argument",
        }
    }

    /// The DAP command involved, when there is one.
    pub fn command(&self) -> Option<&str> {
        match self {
            BrokerError::Session(e) => e.command(),
            _ => None,
        }
    }
}
