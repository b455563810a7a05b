//! Container bridge errors.

use thiserror::Error;

/// Errors from container runtime interaction.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime CLI is missing or not responding.
    #[error("container runtime '{0}' is not available")]
    RuntimeUnavailable(String),

    /// The named container does not exist (or is not visible).
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The container exists but is not running.
    #[error("container '{container}' is not running (state: {state})")]
    ContainerNotRunning {
        /// The container name or id.
        container: String,
        /// The reported state.
        state: String,
    },

    /// Injecting the debug stub failed; carries the runtime's stderr.
    #[error("debug stub injection failed: {stderr}")]
    InjectionFailed {
        /// Stderr from the failed command.
        stderr: String,
    },

    /// Injection failed for lack of ptrace privileges; remediation steps
    /// are attached.
    #[error("ptrace not permitted in container: {stderr}")]
    PtraceDenied {
        /// Stderr from the failed command.
        stderr: String,
        /// Actionable remediation steps.
        instructions: Vec<String>,
    },

    /// No free local port could be allocated for the forward.
    #[error("could not allocate a local port: {0}")]
    PortAllocationFailed(String),

    /// No process matched the attach criteria.
    #[error("no matching process: {0}")]
    NoProcess(String),

    /// More than one process matched; the caller must pick a pid.
    #[error("{count} processes match; specify a pid")]
    AmbiguousProcess {
        /// How many matched.
        count: usize,
        /// The candidates, as (pid, command line).
        candidates: Vec<(i64, String)>,
    },

    /// A runtime command failed in an unclassified way.
    #[error("'{command}' exited with {exit_code}: {stderr}")]
    ExecFailed {
        /// The command line.
        command: String,
        /// Its exit code.
        exit_code: i32,
        /// Its stderr.
        stderr: String,
    },

    /// Subprocess plumbing failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
