//! Request/response dispatcher.
//!
//! Tracks pending requests by sequence number and routes adapter responses
//! to waiting callers via oneshot channels. Responses for unknown or
//! cancelled sequence numbers are discarded without affecting state.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::protocol::Response;

/// Why a pending request was failed without an adapter response.
///
/// Cancellation (session teardown) and unexpected transport loss surface
/// as different errors to the caller, so the dispatcher tags which one
/// happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingFailure {
    /// The session is being torn down; the request was cancelled.
    Cancelled,
    /// The adapter connection died underneath the request.
    Disconnected,
}

/// Receiver half handed to the caller awaiting a response.
///
/// Yields the adapter's response, or a [`PendingFailure`] when the
/// request was failed collectively. A closed channel means the request
/// was cancelled individually (timeout path).
pub type PendingResult = oneshot::Receiver<Result<Response, PendingFailure>>;

/// Manages pending requests for one adapter connection.
#[derive(Debug, Default)]
pub struct Dispatcher {
    pending: HashMap<i64, oneshot::Sender<Result<Response, PendingFailure>>>,
}

impl Dispatcher {
    /// Create a new dispatcher with no pending requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return the receiver for its response.
    pub fn register(&mut self, seq: i64) -> PendingResult {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);
        rx
    }

    /// How many requests are pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fulfil the pending request matching `response.request_seq`.
    ///
    /// Returns `true` when a pending slot was found. Unmatched responses are
    /// dropped; the reader logs them.
    pub fn complete(&mut self, response: Response) -> bool {
        match self.pending.remove(&response.request_seq) {
            Some(tx) => {
                // The caller may have timed out and dropped its receiver.
                let _ = tx.send(Ok(response));
                true
            }
            None => {
                tracing::debug!(
                    request_seq = response.request_seq,
                    command = %response.command,
                    "discarding response for unknown or cancelled request"
                );
                false
            }
        }
    }

    /// Cancel a pending request. A response arriving later is discarded.
    ///
    /// Returns `true` when the request was still pending.
    pub fn cancel(&mut self, seq: i64) -> bool {
        self.pending.remove(&seq).is_some()
    }

    /// Fail every pending request with the given reason: `Cancelled` for
    /// session teardown, `Disconnected` for transport loss.
    pub fn fail_all(&mut self, failure: PendingFailure) {
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(failure));
        }
    }
}
