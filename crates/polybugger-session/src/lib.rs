//! polybugger-session — one debugging conversation with one adapter.
//!
//! A session owns its transport, DAP client, output and event buffers,
//! breakpoint table, watch list, and stop context, and exposes the
//! high-level operations (launch, step, inspect, poll) the broker fronts
//! call.

pub mod breakpoint;
pub mod error;
pub mod events;
pub mod inspect;
pub mod output;
pub mod session;
pub mod state;
pub mod watch;

pub use breakpoint::{BreakpointSpec, BreakpointTable, BreakpointView};
pub use error::SessionError;
pub use events::{EventKind, EventPage, EventQueue, EventRecord};
pub use inspect::{inspect_reference, InspectKind, InspectOptions, Inspection, VariableFetcher};
pub use output::{OutputBuffer, OutputPage, OutputRecord, OutputStream};
pub use session::{
    CallChainFrame, EvaluateView, FrameView, InspectTarget, ScopeView, Session, SessionConfig,
    SessionSnapshot, SourceContextLine, StepMode, VariableView, WatchEvalView,
};
pub use state::{SessionState, StopContext, StopReason};
pub use watch::{Watch, WatchList};
