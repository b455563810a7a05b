//! Bounded output ring buffer.
//!
//! Stdout/stderr fragments from the debuggee (and the adapter's own
//! stderr) land here with monotonic offsets so fronts can poll
//! incrementally. Both a record cap and a byte cap bound memory; overflow
//! drops the oldest records and counts them.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default maximum number of records retained.
pub const DEFAULT_RECORD_CAP: usize = 10_000;

/// Default maximum retained bytes across all records.
pub const DEFAULT_BYTE_CAP: usize = 4 * 1024 * 1024;

/// Where an output fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputStream {
    /// Debuggee stdout.
    Stdout,
    /// Debuggee stderr.
    Stderr,
    /// Adapter console output.
    Console,
    /// Adapter telemetry.
    Telemetry,
    /// The adapter process's own stderr (child-stdio transports).
    AdapterStderr,
}

impl OutputStream {
    /// Map a DAP `output` event category.
    pub fn from_category(category: Option<&str>) -> Self {
        match category {
            Some("stdout") | None => OutputStream::Stdout,
            Some("stderr") => OutputStream::Stderr,
            Some("telemetry") => OutputStream::Telemetry,
            Some(_) => OutputStream::Console,
        }
    }
}

/// One output fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Source stream.
    pub stream: OutputStream,
    /// The fragment text.
    pub content: String,
    /// Monotonic offset, unique per session.
    pub offset: u64,
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
}

/// A page of output returned to a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPage {
    /// Records at or past the requested `since_offset` cursor.
    pub records: Vec<OutputRecord>,
    /// Pass this back as `since_offset` to continue.
    pub next_offset: u64,
    /// Total records dropped to overflow so far.
    pub dropped: u64,
}

#[derive(Debug)]
struct Ring {
    records: VecDeque<OutputRecord>,
    bytes: usize,
    next_offset: u64,
    dropped: u64,
}

/// Thread-safe bounded output buffer.
#[derive(Debug)]
pub struct OutputBuffer {
    ring: Mutex<Ring>,
    record_cap: usize,
    byte_cap: usize,
}

impl OutputBuffer {
    /// Buffer with the default caps.
    pub fn new() -> Self {
        Self::with_caps(DEFAULT_RECORD_CAP, DEFAULT_BYTE_CAP)
    }

    /// Buffer with explicit caps.
    pub fn with_caps(record_cap: usize, byte_cap: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                records: VecDeque::new(),
                bytes: 0,
                next_offset: 0,
                dropped: 0,
            }),
            record_cap: record_cap.max(1),
            byte_cap: byte_cap.max(1),
        }
    }

    /// Append a fragment, evicting the oldest records past either cap.
    pub fn push(&self, stream: OutputStream, content: impl Into<String>) -> u64 {
        let content = content.into();
        let mut ring = self.ring.lock().expect("output ring poisoned");
        let offset = ring.next_offset;
        ring.next_offset += 1;
        ring.bytes += content.len();
        ring.records.push_back(OutputRecord {
            stream,
            content,
            offset,
            timestamp: Utc::now(),
        });

        while ring.records.len() > self.record_cap
            || (ring.bytes > self.byte_cap && ring.records.len() > 1)
        {
            if let Some(evicted) = ring.records.pop_front() {
                ring.bytes -= evicted.content.len();
                ring.dropped += 1;
            }
        }
        offset
    }

    /// Records at or past the `since_offset` cursor, optionally filtered
    /// by stream, up to `max`.
    pub fn page(&self, stream: Option<OutputStream>, since_offset: u64, max: usize) -> OutputPage {
        let ring = self.ring.lock().expect("output ring poisoned");
        let records: Vec<OutputRecord> = ring
            .records
            .iter()
            .filter(|r| r.offset >= since_offset)
            .filter(|r| stream.map_or(true, |s| r.stream == s))
            .take(max)
            .cloned()
            .collect();
        let next_offset = records.last().map(|r| r.offset + 1).unwrap_or(since_offset);
        OutputPage {
            records,
            next_offset,
            dropped: ring.dropped,
        }
    }

    /// Total records dropped so far.
    pub fn dropped(&self) -> u64 {
        self.ring.lock().expect("output ring poisoned").dropped
    }

    /// Retained record count.
    pub fn len(&self) -> usize {
        self.ring.lock().expect("output ring poisoned").records.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_offsets_are_monotonic() {
        let buffer = OutputBuffer::new();
        assert_eq!(buffer.push(OutputStream::Stdout, "a"), 0);
        assert_eq!(buffer.push(OutputStream::Stderr, "b"), 1);
        assert_eq!(buffer.push(OutputStream::Stdout, "c"), 2);
    }

    #[test]
    fn output_page_since_offset() {
        let buffer = OutputBuffer::new();
        for i in 0..5 {
            buffer.push(OutputStream::Stdout, format!("line {i}"));
        }
        let page = buffer.page(None, 2, 100);
        assert_eq!(page.records.len(), 3);
        assert_eq!(page.records[0].offset, 2);
        assert_eq!(page.next_offset, 5);
        assert_eq!(page.dropped, 0);
    }

    #[test]
    fn output_page_respects_max() {
        let buffer = OutputBuffer::new();
        for i in 0..10 {
            buffer.push(OutputStream::Stdout, format!("{i}"));
        }
        let page = buffer.page(None, 0, 4);
        assert_eq!(page.records.len(), 4);
        assert_eq!(page.next_offset, 4);
    }

    #[test]
    fn output_page_filters_by_stream() {
        let buffer = OutputBuffer::new();
        buffer.push(OutputStream::Stdout, "out");
        buffer.push(OutputStream::Stderr, "err");
        buffer.push(OutputStream::Stdout, "out2");

        let page = buffer.page(Some(OutputStream::Stderr), 0, 100);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].content, "err");
    }

    #[test]
    fn output_record_cap_drops_oldest() {
        let buffer = OutputBuffer::with_caps(3, usize::MAX >> 1);
        for i in 0..5 {
            buffer.push(OutputStream::Stdout, format!("{i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);

        let page = buffer.page(None, 0, 100);
        assert_eq!(page.records[0].content, "2");
        assert_eq!(page.dropped, 2);
    }

    #[test]
    fn output_byte_cap_drops_oldest() {
        let buffer = OutputBuffer::with_caps(100, 10);
        buffer.push(OutputStream::Stdout, "aaaaaa");
        buffer.push(OutputStream::Stdout, "bbbbbb");
        // 12 bytes > 10: the first record goes.
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dropped(), 1);
    }

    #[test]
    fn output_single_oversized_record_is_kept() {
        // A record larger than the byte cap must still be retained;
        // eviction always leaves at least one record.
        let buffer = OutputBuffer::with_caps(100, 4);
        buffer.push(OutputStream::Stdout, "oversized record");
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn output_dropped_is_monotonic() {
        let buffer = OutputBuffer::with_caps(2, usize::MAX >> 1);
        let mut last = 0;
        for i in 0..20 {
            buffer.push(OutputStream::Stdout, format!("{i}"));
            let dropped = buffer.dropped();
            assert!(dropped >= last);
            last = dropped;
        }
        assert_eq!(last, 18);
    }

    #[test]
    fn output_ten_thousand_lines() {
        let buffer = OutputBuffer::new();
        for i in 0..10_000 {
            buffer.push(OutputStream::Stdout, format!("line {i}"));
        }
        assert_eq!(buffer.len(), DEFAULT_RECORD_CAP.min(10_000));
        let page = buffer.page(None, 9_990, 100);
        assert_eq!(page.records.len(), 10);
        assert_eq!(page.next_offset, 10_000);
    }

    #[test]
    fn output_stream_from_category() {
        assert_eq!(OutputStream::from_category(Some("stdout")), OutputStream::Stdout);
        assert_eq!(OutputStream::from_category(Some("stderr")), OutputStream::Stderr);
        assert_eq!(OutputStream::from_category(Some("telemetry")), OutputStream::Telemetry);
        assert_eq!(OutputStream::from_category(Some("console")), OutputStream::Console);
        assert_eq!(OutputStream::from_category(Some("important")), OutputStream::Console);
        assert_eq!(OutputStream::from_category(None), OutputStream::Stdout);
    }

    #[test]
    fn output_stream_serde_kebab_case() {
        let json = serde_json::to_string(&OutputStream::AdapterStderr).unwrap();
        assert_eq!(json, "\"adapter-stderr\"");
    }
}
