//! Async DAP client.
//!
//! Correlates requests with responses via sequence numbers, routes adapter
//! events to the owning session, and answers reverse requests. One router
//! task per connection consumes the transport's event stream, so responses
//! and events reach their consumers strictly in arrival order.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::dispatcher::{Dispatcher, PendingFailure};
use crate::error::DapError;
use crate::protocol::{Request, Response, RunInTerminalResponseBody};
use crate::transport::{Transport, TransportEvent};

/// Default deadline for a request when the caller does not override it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// What the router forwards to the owning session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A debugger event (`stopped`, `output`, `terminated`, ...).
    Event {
        /// The DAP event name.
        name: String,
        /// The event body, if any.
        body: Option<Value>,
    },
    /// A line of adapter stderr.
    Stderr(String),
    /// The wire violated framing rules; the connection is dead.
    Malformed(String),
    /// The adapter connection is gone.
    Disconnected,
}

/// How to answer adapter-initiated (reverse) requests.
///
/// The spec default is a canned success with a synthetic process id;
/// profiles that must ignore reverse requests turn `reply` off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseRequestPolicy {
    /// Whether to answer at all.
    pub reply: bool,
    /// Synthetic process id reported for `runInTerminal`.
    pub synthetic_process_id: i64,
}

impl Default for ReverseRequestPolicy {
    fn default() -> Self {
        Self {
            reply: true,
            synthetic_process_id: 1,
        }
    }
}

/// A connected DAP client.
#[derive(Debug)]
pub struct DapClient {
    transport: Arc<Transport>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    next_seq: Arc<AtomicI64>,
    connected: Arc<AtomicBool>,
    default_timeout: Duration,
}

impl DapClient {
    /// Wrap a transport. Spawns the router task that drains `events` and
    /// forwards debugger events to `inbound`.
    pub fn new(
        transport: Transport,
        events: mpsc::Receiver<TransportEvent>,
        inbound: mpsc::Sender<InboundEvent>,
        policy: ReverseRequestPolicy,
        default_timeout: Duration,
    ) -> Self {
        let transport = Arc::new(transport);
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let next_seq = Arc::new(AtomicI64::new(1));

        tokio::spawn(route_inbound(
            events,
            inbound,
            transport.clone(),
            dispatcher.clone(),
            connected.clone(),
            policy,
            next_seq.clone(),
        ));

        Self {
            transport,
            dispatcher,
            next_seq,
            connected,
            default_timeout,
        }
    }

    /// Whether the adapter connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Issue a request and wait for its response body.
    ///
    /// Fails with [`DapError::AdapterError`] when the adapter answers
    /// `success: false`, [`DapError::Timeout`] when no response arrives in
    /// time (the pending slot is cancelled and a late response discarded),
    /// [`DapError::Cancelled`] when [`DapClient::shutdown`] tears the
    /// session down underneath the request, and [`DapError::Disconnected`]
    /// when the connection dies first.
    pub async fn request(
        &self,
        command: &str,
        arguments: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<Option<Value>, DapError> {
        if !self.is_connected() {
            return Err(DapError::Disconnected);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::to_value(Request::new(seq, command, arguments))
            .map_err(|e| DapError::InvalidResponse(e.to_string()))?;

        let rx = {
            let mut dispatcher = self.dispatcher.lock().await;
            dispatcher.register(seq)
        };

        if let Err(e) = self.transport.send(frame).await {
            let mut dispatcher = self.dispatcher.lock().await;
            dispatcher.cancel(seq);
            return Err(e);
        }

        let deadline = deadline.unwrap_or(self.default_timeout);
        let response = match timeout(deadline, rx).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(PendingFailure::Cancelled))) => {
                return Err(DapError::Cancelled {
                    command: command.to_string(),
                })
            }
            Ok(Ok(Err(PendingFailure::Disconnected))) | Ok(Err(_)) => {
                return Err(DapError::Disconnected)
            }
            Err(_) => {
                let mut dispatcher = self.dispatcher.lock().await;
                dispatcher.cancel(seq);
                return Err(DapError::Timeout {
                    command: command.to_string(),
                });
            }
        };

        if response.success {
            Ok(response.body)
        } else {
            Err(DapError::AdapterError {
                command: command.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "unknown adapter error".to_string()),
            })
        }
    }

    /// Issue a request and deserialize its body into `T`.
    pub async fn request_as<T: serde::de::DeserializeOwned>(
        &self,
        command: &str,
        arguments: Option<Value>,
        deadline: Option<Duration>,
    ) -> Result<T, DapError> {
        let body = self
            .request(command, arguments, deadline)
            .await?
            .unwrap_or(Value::Null);
        serde_json::from_value(body)
            .map_err(|e| DapError::InvalidResponse(format!("{command} body: {e}")))
    }

    /// Cancel every pending request (they fail with
    /// [`DapError::Cancelled`]) and close the transport.
    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut dispatcher = self.dispatcher.lock().await;
            dispatcher.fail_all(PendingFailure::Cancelled);
        }
        self.transport.close();
    }
}

#[allow(clippy::too_many_arguments)]
async fn route_inbound(
    mut events: mpsc::Receiver<TransportEvent>,
    inbound: mpsc::Sender<InboundEvent>,
    transport: Arc<Transport>,
    dispatcher: Arc<Mutex<Dispatcher>>,
    connected: Arc<AtomicBool>,
    policy: ReverseRequestPolicy,
    reply_seq: Arc<AtomicI64>,
) {
    let mut disconnect_sent = false;
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                route_frame(frame, &inbound, &transport, &dispatcher, policy, &reply_seq).await;
            }
            TransportEvent::Stderr(line) => {
                let _ = inbound.send(InboundEvent::Stderr(line)).await;
            }
            TransportEvent::Malformed(message) => {
                connected.store(false, Ordering::SeqCst);
                let mut dispatcher = dispatcher.lock().await;
                dispatcher.fail_all(PendingFailure::Disconnected);
                drop(dispatcher);
                let _ = inbound.send(InboundEvent::Malformed(message)).await;
            }
            TransportEvent::Closed => {
                connected.store(false, Ordering::SeqCst);
                let mut dispatcher = dispatcher.lock().await;
                dispatcher.fail_all(PendingFailure::Disconnected);
                drop(dispatcher);
                if !disconnect_sent {
                    disconnect_sent = true;
                    let _ = inbound.send(InboundEvent::Disconnected).await;
                }
            }
        }
    }
}

async fn route_frame(
    frame: Value,
    inbound: &mpsc::Sender<InboundEvent>,
    transport: &Transport,
    dispatcher: &Mutex<Dispatcher>,
    policy: ReverseRequestPolicy,
    reply_seq: &AtomicI64,
) {
    match frame.get("type").and_then(Value::as_str) {
        Some("response") => match serde_json::from_value::<Response>(frame) {
            Ok(response) => {
                let mut dispatcher = dispatcher.lock().await;
                dispatcher.complete(response);
            }
            Err(e) => tracing::warn!("dropping unparseable response: {e}"),
        },
        Some("event") => {
            let name = frame
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let body = frame.get("body").cloned();
            let _ = inbound.send(InboundEvent::Event { name, body }).await;
        }
        Some("request") => {
            // Reverse request (e.g. runInTerminal). Never an error; answer
            // with a canned success unless the profile says to ignore it.
            let command = frame
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let request_seq = frame.get("seq").and_then(Value::as_i64).unwrap_or(0);
            tracing::debug!(command = %command, "reverse request from adapter");
            if !policy.reply {
                return;
            }
            let body = RunInTerminalResponseBody {
                process_id: Some(policy.synthetic_process_id),
            };
            let reply = Response {
                seq: reply_seq.fetch_add(1, Ordering::SeqCst),
                message_type: "response".into(),
                request_seq,
                success: true,
                command,
                message: None,
                body: serde_json::to_value(body).ok(),
            };
            if let Ok(frame) = serde_json::to_value(reply) {
                let _ = transport.send(frame).await;
            }
        }
        other => {
            tracing::warn!(message_type = ?other, "dropping frame with unknown type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, FrameDecoder};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// A scripted adapter on the far end of a duplex pipe.
    ///
    /// `script` receives each decoded request and returns frames to send
    /// back (responses and/or events).
    fn scripted_adapter<F>(
        pipe: tokio::io::DuplexStream,
        mut script: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(Value) -> Vec<Value> + Send + 'static,
    {
        tokio::spawn(async move {
            let (mut read, mut write) = tokio::io::split(pipe);
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = match read.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.extend(&buf[..n]);
                while let Ok(Some(frame)) = decoder.next_frame() {
                    for reply in script(frame) {
                        if write.write_all(&encode_frame(&reply)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    fn connect_client<F>(script: F) -> (DapClient, mpsc::Receiver<InboundEvent>)
    where
        F: FnMut(Value) -> Vec<Value> + Send + 'static,
    {
        let (ours, theirs) = tokio::io::duplex(16 * 1024);
        scripted_adapter(theirs, script);
        let (read, write) = tokio::io::split(ours);
        let (transport, events) = Transport::from_streams(write, read);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let client = DapClient::new(
            transport,
            events,
            inbound_tx,
            ReverseRequestPolicy::default(),
            Duration::from_secs(2),
        );
        (client, inbound_rx)
    }

    fn success_response(request: &Value, body: Value) -> Value {
        json!({
            "seq": 1000,
            "type": "response",
            "request_seq": request["seq"],
            "success": true,
            "command": request["command"],
            "body": body,
        })
    }

    #[tokio::test]
    async fn client_request_roundtrip() {
        let (client, _inbound) = connect_client(|req| {
            assert_eq!(req["type"], "request");
            vec![success_response(&req, json!({"threads": []}))]
        });

        let body = client.request("threads", None, None).await.unwrap();
        assert_eq!(body.unwrap()["threads"], json!([]));
    }

    #[tokio::test]
    async fn client_seq_increments_per_request() {
        let (client, _inbound) = connect_client(|req| vec![success_response(&req, json!({}))]);
        client.request("threads", None, None).await.unwrap();
        client.request("threads", None, None).await.unwrap();
        assert_eq!(client.next_seq.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_adapter_error_passes_message_through() {
        let (client, _inbound) = connect_client(|req| {
            vec![json!({
                "seq": 1000,
                "type": "response",
                "request_seq": req["seq"],
                "success": false,
                "command": req["command"],
                "message": "ZeroDivisionError: division by zero",
            })]
        });

        let err = client
            .request("evaluate", Some(json!({"expression": "1/0"})), None)
            .await
            .unwrap_err();
        match err {
            DapError::AdapterError { command, message } => {
                assert_eq!(command, "evaluate");
                assert!(message.contains("division"));
            }
            other => panic!("expected AdapterError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_events_forwarded_in_order() {
        let (client, mut inbound) = connect_client(|req| {
            vec![
                json!({"seq": 1, "type": "event", "event": "initialized"}),
                json!({"seq": 2, "type": "event", "event": "stopped",
                       "body": {"reason": "entry", "threadId": 1}}),
                success_response(&req, json!({})),
            ]
        });

        client.request("launch", None, None).await.unwrap();

        match inbound.recv().await.unwrap() {
            InboundEvent::Event { name, .. } => assert_eq!(name, "initialized"),
            other => panic!("expected event, got {other:?}"),
        }
        match inbound.recv().await.unwrap() {
            InboundEvent::Event { name, body } => {
                assert_eq!(name, "stopped");
                assert_eq!(body.unwrap()["reason"], "entry");
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_reverse_request_gets_canned_success() {
        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        let (client, _inbound) = connect_client(move |frame| {
            if frame["type"] == "response" {
                // The canned reply to our reverse request.
                let _ = reply_tx.try_send(frame);
                vec![]
            } else {
                vec![
                    json!({"seq": 50, "type": "request", "command": "runInTerminal",
                           "arguments": {"args": ["python"]}}),
                    success_response(&frame, json!({})),
                ]
            }
        });

        client.request("launch", None, None).await.unwrap();

        let reply = reply_rx.recv().await.unwrap();
        assert_eq!(reply["request_seq"], 50);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["command"], "runInTerminal");
        assert_eq!(reply["body"]["processId"], 1);
    }

    #[tokio::test]
    async fn client_timeout_cancels_slot() {
        let (client, _inbound) = connect_client(|_req| vec![]);

        let err = client
            .request("threads", None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, DapError::Timeout { .. }));

        let dispatcher = client.dispatcher.lock().await;
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn client_late_response_after_timeout_is_discarded() {
        // Adapter only answers the second request it sees, echoing whatever
        // seq the first one carried, so the reply is late for request one
        // and unknown for request two.
        let first_seq = std::sync::Arc::new(std::sync::Mutex::new(None::<i64>));
        let script_seq = first_seq.clone();
        let (client, _inbound) = connect_client(move |req| {
            let mut guard = script_seq.lock().unwrap();
            match *guard {
                None => {
                    *guard = req["seq"].as_i64();
                    vec![]
                }
                Some(stale) => vec![json!({
                    "seq": 1000,
                    "type": "response",
                    "request_seq": stale,
                    "success": true,
                    "command": "threads",
                })],
            }
        });

        let err = client
            .request("threads", None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, DapError::Timeout { .. }));

        // Second request: its own slot never gets an answer (the stale one
        // is discarded), so it times out too rather than mis-matching.
        let err = client
            .request("threads", None, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, DapError::Timeout { .. }));
    }

    #[tokio::test]
    async fn client_disconnect_fails_pending_and_future_requests() {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(ours);
        let (transport, events) = Transport::from_streams(write, read);
        let (inbound_tx, mut inbound_rx) = mpsc::channel(16);
        let client = DapClient::new(
            transport,
            events,
            inbound_tx,
            ReverseRequestPolicy::default(),
            Duration::from_secs(5),
        );

        let pending = client.request("threads", None, None);
        drop(theirs);

        let err = pending.await.unwrap_err();
        assert!(matches!(err, DapError::Disconnected));
        assert_eq!(inbound_rx.recv().await.unwrap(), InboundEvent::Disconnected);
        assert!(!client.is_connected());

        let err = client.request("threads", None, None).await.unwrap_err();
        assert!(matches!(err, DapError::Disconnected));
    }

    #[tokio::test]
    async fn client_shutdown_cancels_pending_requests() {
        // An adapter that never answers; shutdown must fail the in-flight
        // request with Cancelled, not Disconnected.
        let (client, _inbound) = connect_client(|_req| vec![]);
        let client = std::sync::Arc::new(client);

        let pending = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .request("threads", None, Some(Duration::from_secs(5)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.shutdown().await;

        let err = pending.await.unwrap().unwrap_err();
        match err {
            DapError::Cancelled { command } => assert_eq!(command, "threads"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn client_request_as_parses_typed_body() {
        let (client, _inbound) = connect_client(|req| {
            vec![success_response(
                &req,
                json!({"threads": [{"id": 1, "name": "MainThread"}]}),
            )]
        });

        let body: crate::protocol::ThreadsResponseBody =
            client.request_as("threads", None, None).await.unwrap();
        assert_eq!(body.threads.len(), 1);
        assert_eq!(body.threads[0].name, "MainThread");
    }
}
