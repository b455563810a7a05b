//! Session state machine and stop context.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// The lifecycle state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session exists; no adapter conversation yet.
    Created,
    /// Launch or attach handshake in progress.
    Launching,
    /// The debuggee is running.
    Running,
    /// The debuggee is stopped; inspection is valid.
    Stopped,
    /// The conversation is over (explicit terminate, adapter exit, or
    /// `terminated` event).
    Terminated,
    /// The adapter died or misbehaved before or outside a clean shutdown.
    Failed,
}

impl SessionState {
    /// Whether the session can still talk to an adapter.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Launching => "launching",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Terminated => "terminated",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why the debuggee stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// A breakpoint was hit.
    Breakpoint,
    /// A step request completed.
    Step,
    /// A pause request was fulfilled.
    Pause,
    /// An exception was raised.
    Exception,
    /// The entry point was reached (stopOnEntry).
    Entry,
}

impl StopReason {
    /// Map a DAP `stopped` reason string; unknown reasons count as pauses.
    pub fn from_dap(reason: &str) -> Self {
        match reason {
            "breakpoint" | "function breakpoint" | "data breakpoint" => StopReason::Breakpoint,
            "step" => StopReason::Step,
            "exception" => StopReason::Exception,
            "entry" => StopReason::Entry,
            _ => StopReason::Pause,
        }
    }

    /// Canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
            StopReason::Pause => "pause",
            StopReason::Exception => "exception",
            StopReason::Entry => "entry",
        }
    }
}

/// State captured at a `stopped` event; present only while STOPPED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopContext {
    /// The thread that stopped.
    pub thread_id: i64,
    /// Why it stopped.
    pub reason: StopReason,
    /// Adapter-reported description, if any.
    pub description: Option<String>,
    /// Top frame id, filled in lazily by the first stack fetch.
    pub top_frame_id: Option<i64>,
    /// Breakpoints hit, when the adapter reports them.
    pub hit_breakpoint_ids: Vec<i64>,
}

/// The state machine for one session.
///
/// Transitions follow the lifecycle exactly; anything else returns
/// [`SessionError::InvalidState`] and leaves the state untouched.
#[derive(Debug)]
pub struct StateMachine {
    state: SessionState,
    stop: Option<StopContext>,
}

impl StateMachine {
    /// New machine in CREATED.
    pub fn new() -> Self {
        Self {
            state: SessionState::Created,
            stop: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current stop context, present only in STOPPED.
    pub fn stop_context(&self) -> Option<&StopContext> {
        self.stop.as_ref()
    }

    /// Mutable stop context, for backfilling the top frame id.
    pub fn stop_context_mut(&mut self) -> Option<&mut StopContext> {
        self.stop.as_mut()
    }

    /// CREATED → LAUNCHING on launch or attach.
    pub fn begin_launch(&mut self, operation: &'static str) -> Result<(), SessionError> {
        self.require(operation, SessionState::Created, "CREATED")?;
        self.state = SessionState::Launching;
        Ok(())
    }

    /// LAUNCHING → RUNNING once the configuration handshake finishes.
    ///
    /// A `stopped` event racing the handshake (stopOnEntry) wins; the call
    /// is then a no-op.
    pub fn finish_launch(&mut self) {
        if self.state == SessionState::Launching {
            self.state = SessionState::Running;
        }
    }

    /// LAUNCHING → FAILED on adapter exit or handshake timeout.
    pub fn fail(&mut self) {
        if self.state != SessionState::Terminated {
            self.state = SessionState::Failed;
            self.stop = None;
        }
    }

    /// RUNNING (or LAUNCHING, for stopOnEntry) → STOPPED.
    pub fn on_stopped(&mut self, context: StopContext) {
        if matches!(self.state, SessionState::Running | SessionState::Launching) {
            self.state = SessionState::Stopped;
            self.stop = Some(context);
        }
    }

    /// STOPPED → RUNNING on continue/step, or on a `continued` event.
    pub fn on_resumed(&mut self) {
        if self.state == SessionState::Stopped {
            self.state = SessionState::Running;
            self.stop = None;
        }
    }

    /// Any → TERMINATED.
    pub fn on_terminated(&mut self) {
        self.state = SessionState::Terminated;
        self.stop = None;
    }

    /// Reject the operation unless the state matches exactly.
    pub fn require(
        &self,
        operation: &'static str,
        state: SessionState,
        required: &'static str,
    ) -> Result<(), SessionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                current: self.state,
                required,
            })
        }
    }

    /// Reject the operation in TERMINATED or FAILED.
    pub fn require_not_terminal(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            Err(SessionError::InvalidState {
                operation,
                current: self.state,
                required: "any non-terminal state",
            })
        } else {
            Ok(())
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
