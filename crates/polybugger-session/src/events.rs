//! Bounded event queue with blocking polls.
//!
//! Debugger events flow in from the session's reader side; fronts poll
//! with a `since_offset` cursor, optionally blocking for the first record.
//! The queue is bounded: overflow drops the oldest record and counts it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;

/// Default maximum number of queued event records.
pub const DEFAULT_EVENT_CAP: usize = 1_000;

/// Event kinds exposed to pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// The debuggee stopped.
    Stopped,
    /// The debuggee resumed.
    Continued,
    /// The debug session ended.
    Terminated,
    /// The debuggee process exited.
    Exited,
    /// A thread started or exited.
    Thread,
    /// New output is available in the output buffer.
    OutputAvailable,
    /// The adapter changed a breakpoint's state.
    BreakpointChanged,
    /// A module was loaded or unloaded.
    Module,
    /// The session failed (transport error, malformed wire data).
    Failure,
}

/// One queued event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// What happened.
    pub kind: EventKind,
    /// Event payload, shape per kind.
    pub payload: Value,
    /// Monotonic offset, unique per session.
    pub offset: u64,
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
}

/// A page of events returned to a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// Records at or past the requested `since_offset` cursor.
    pub records: Vec<EventRecord>,
    /// Pass this back as `since_offset` to continue.
    pub next_offset: u64,
    /// Total records dropped to overflow so far.
    pub dropped: u64,
}

#[derive(Debug)]
struct QueueInner {
    records: VecDeque<EventRecord>,
    next_offset: u64,
    dropped: u64,
}

/// Thread-safe bounded event FIFO.
///
/// The lock is never held across an await; blocking polls park on a
/// [`Notify`] that every append signals.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    cap: usize,
}

impl EventQueue {
    /// Queue with the default cap.
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_EVENT_CAP)
    }

    /// Queue with an explicit cap.
    pub fn with_cap(cap: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                records: VecDeque::new(),
                next_offset: 0,
                dropped: 0,
            }),
            notify: Notify::new(),
            cap: cap.max(1),
        }
    }

    /// Append an event, evicting the oldest record when full.
    pub fn push(&self, kind: EventKind, payload: Value) -> u64 {
        let offset = {
            let mut inner = self.inner.lock().expect("event queue poisoned");
            let offset = inner.next_offset;
            inner.next_offset += 1;
            inner.records.push_back(EventRecord {
                kind,
                payload,
                offset,
                timestamp: Utc::now(),
            });
            while inner.records.len() > self.cap {
                inner.records.pop_front();
                inner.dropped += 1;
            }
            offset
        };
        self.notify.notify_waiters();
        offset
    }

    /// Post an `output-available` marker unless the queue tail already is
    /// one, so pollers wake without the queue flooding.
    pub fn mark_output_available(&self) {
        {
            let inner = self.inner.lock().expect("event queue poisoned");
            if inner
                .records
                .back()
                .is_some_and(|r| r.kind == EventKind::OutputAvailable)
            {
                // Pollers not yet past the marker will see it; nothing new
                // to say.
                self.notify.notify_waiters();
                return;
            }
        }
        self.push(EventKind::OutputAvailable, Value::Null);
    }

    /// Non-blocking read of records at or past the `since_offset` cursor.
    pub fn drain(&self, since_offset: u64, max: usize) -> EventPage {
        let inner = self.inner.lock().expect("event queue poisoned");
        let records: Vec<EventRecord> = inner
            .records
            .iter()
            .filter(|r| r.offset >= since_offset)
            .take(max)
            .cloned()
            .collect();
        let next_offset = records.last().map(|r| r.offset + 1).unwrap_or(since_offset);
        EventPage {
            records,
            next_offset,
            dropped: inner.dropped,
        }
    }

    /// Poll with an optional wait for the first record.
    ///
    /// When nothing newer than `since_offset` is queued and `wait` is set,
    /// blocks up to that long for an append.
    pub async fn poll(&self, since_offset: u64, max: usize, wait: Option<Duration>) -> EventPage {
        let deadline = wait.map(|w| tokio::time::Instant::now() + w);
        loop {
            let notified = self.notify.notified();
            let page = self.drain(since_offset, max);
            if !page.records.is_empty() {
                return page;
            }
            let Some(deadline) = deadline else {
                return page;
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.drain(since_offset, max);
            }
        }
    }

    /// Total records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().expect("event queue poisoned").dropped
    }

    /// Queued record count.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("event queue poisoned").records.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
