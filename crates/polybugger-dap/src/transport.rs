//! DAP transports.
//!
//! Two variants: **child-stdio** (spawn the adapter, write framed requests
//! to its stdin, read framed messages from stdout, drain stderr) and
//! **tcp** (connect to a listening adapter). Both expose the same handle:
//! a serialised `send`, a stream of [`TransportEvent`]s produced by a
//! dedicated reader task, and `close`.
//!
//! The transport never interprets message contents.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::codec::{encode_frame, FrameDecoder};
use crate::error::DapError;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outbound write queue.
const WRITE_CHANNEL_CAPACITY: usize = 64;

/// How to reach a DAP adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEndpoint {
    /// Spawn a process and speak DAP over its stdio.
    ChildStdio(ChildSpec),
    /// Connect to a listening adapter.
    Tcp {
        /// Host to connect to.
        host: String,
        /// Port to connect to.
        port: u16,
    },
}

/// Command line for a child-stdio adapter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChildSpec {
    /// Executable to spawn.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

/// Something the reader side of a transport produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A complete framed message arrived.
    Frame(Value),
    /// A line of adapter stderr (child-stdio only).
    Stderr(String),
    /// The byte stream violated the framing rules; no further frames follow.
    Malformed(String),
    /// The connection is gone (EOF, socket close, or child exit).
    ///
    /// May be observed more than once when both the reader and the child
    /// exit observer notice the termination; consumers treat it as
    /// idempotent.
    Closed,
}

/// Handle to a live adapter connection.
///
/// Writes are serialised through a single writer task; reads happen on a
/// dedicated reader task that feeds the event channel returned at
/// construction.
#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::Sender<Value>,
    shutdown: watch::Sender<bool>,
}

impl Transport {
    /// Connect to the given endpoint.
    pub async fn connect(
        endpoint: &TransportEndpoint,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), DapError> {
        match endpoint {
            TransportEndpoint::ChildStdio(spec) => Self::spawn_child(spec),
            TransportEndpoint::Tcp { host, port } => Self::connect_tcp(host, *port).await,
        }
    }

    /// Spawn a child adapter and wire up its stdio.
    pub fn spawn_child(
        spec: &ChildSpec,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), DapError> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| DapError::SpawnFailed(format!("{}: {e}", spec.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DapError::SpawnFailed("could not capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DapError::SpawnFailed("could not capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DapError::SpawnFailed("could not capture stderr".into()))?;

        let (transport, events_tx, events_rx, shutdown_rx) = Self::wire(stdin, stdout);

        // Stderr drain: line-buffered, tagged for the output buffer.
        let stderr_tx = events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(TransportEvent::Stderr(line)).await.is_err() {
                    break;
                }
            }
        });

        // Child exit observer: reaps the process and posts Closed. A close()
        // request kills the child first.
        let exit_tx = events_tx;
        let mut exit_shutdown = shutdown_rx;
        tokio::spawn(async move {
            tokio::select! {
                _ = child.wait() => {}
                _ = exit_shutdown.changed() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            let _ = exit_tx.send(TransportEvent::Closed).await;
        });

        Ok((transport, events_rx))
    }

    /// Connect to a TCP adapter endpoint.
    pub async fn connect_tcp(
        host: &str,
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), DapError> {
        let stream = tokio::net::TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (transport, _events_tx, events_rx, _shutdown_rx) = Self::wire(write_half, read_half);
        Ok((transport, events_rx))
    }

    /// Build a transport over arbitrary byte streams.
    ///
    /// This is the common core of both variants and the seam scripted
    /// adapter tests use (e.g. over `tokio::io::duplex`).
    pub fn from_streams<W, R>(writer: W, reader: R) -> (Self, mpsc::Receiver<TransportEvent>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (transport, _events_tx, events_rx, _shutdown_rx) = Self::wire(writer, reader);
        (transport, events_rx)
    }

    fn wire<W, R>(
        writer: W,
        reader: R,
    ) -> (
        Self,
        mpsc::Sender<TransportEvent>,
        mpsc::Receiver<TransportEvent>,
        watch::Receiver<bool>,
    )
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(WRITE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Writer task: FIFO over the outbound queue.
        let mut writer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut writer = writer;
            loop {
                let frame = tokio::select! {
                    f = outbound_rx.recv() => match f {
                        Some(f) => f,
                        None => break,
                    },
                    _ = writer_shutdown.changed() => break,
                };
                let bytes = encode_frame(&frame);
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: sole producer of Frame/Malformed events.
        let reader_tx = events_tx.clone();
        let mut reader_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut reader = reader;
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 8192];
            loop {
                let read = tokio::select! {
                    r = reader.read(&mut buf) => r,
                    _ = reader_shutdown.changed() => break,
                };
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => decoder.extend(&buf[..n]),
                }
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => {
                            if reader_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = reader_tx
                                .send(TransportEvent::Malformed(e.to_string()))
                                .await;
                            let _ = reader_tx.send(TransportEvent::Closed).await;
                            return;
                        }
                    }
                }
            }
            let _ = reader_tx.send(TransportEvent::Closed).await;
        });

        let transport = Self {
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        };
        (transport, events_tx, events_rx, shutdown_rx)
    }

    /// Queue a frame for sending. Frames from one caller keep their order.
    pub async fn send(&self, frame: Value) -> Result<(), DapError> {
        if *self.shutdown.borrow() {
            return Err(DapError::Disconnected);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| DapError::Disconnected)
    }

    /// Tear the connection down: stops the writer, signals the reader, and
    /// kills a child adapter if one is attached.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}
