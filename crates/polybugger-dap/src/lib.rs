//! polybugger-dap — Debug Adapter Protocol plumbing for the broker.
//!
//! This crate implements the DAP client side: Content-Length wire framing,
//! child-stdio and TCP transports, request/response correlation, and the
//! async client that the session layer drives. It never interprets debugger
//! semantics; that is the session's job.

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export key types for convenience.
pub use capabilities::AdapterCapabilities;
pub use client::{DapClient, InboundEvent, ReverseRequestPolicy};
pub use codec::{decode_frame, encode_frame, FrameDecoder};
pub use dispatcher::{Dispatcher, PendingFailure, PendingResult};
pub use error::DapError;
pub use protocol::*;
pub use transport::{Transport, TransportEndpoint, TransportEvent};
