//! DAP wire codec — Content-Length based message framing.
//!
//! A framed message is an ASCII header of `Name: Value` lines terminated by
//! `\r\n\r\n`, followed by a JSON body of exactly `Content-Length` bytes.
//! Only `Content-Length` is interpreted; unknown headers are skipped.

use serde_json::Value;

use crate::error::DapError;

/// Maximum accepted size of the header section.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Maximum accepted size of a message body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encode a JSON value into a framed DAP message.
///
/// The encoder always emits a single `Content-Length` header with no
/// trailing whitespace.
pub fn encode_frame(value: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Try to decode one framed message from the front of `data`.
///
/// Returns `Ok(Some((value, consumed)))` when a complete frame is present,
/// `Ok(None)` when more bytes are needed, and `Err` with
/// [`DapError::MalformedFrame`] when the data can never become a valid frame
/// (header cap exceeded, body cap exceeded, unparseable header, or a body
/// that is not valid JSON).
pub fn decode_frame(data: &[u8]) -> Result<Option<(Value, usize)>, DapError> {
    let Some(sep) = find_terminator(data) else {
        if data.len() > MAX_HEADER_BYTES {
            return Err(DapError::MalformedFrame(format!(
                "header not terminated within {MAX_HEADER_BYTES} bytes"
            )));
        }
        return Ok(None);
    };
    if sep > MAX_HEADER_BYTES {
        return Err(DapError::MalformedFrame(format!(
            "header exceeds {MAX_HEADER_BYTES} bytes"
        )));
    }

    let header = std::str::from_utf8(&data[..sep])
        .map_err(|_| DapError::MalformedFrame("header is not ASCII".into()))?;
    let content_length = parse_content_length(header)?;
    if content_length > MAX_BODY_BYTES {
        return Err(DapError::MalformedFrame(format!(
            "body of {content_length} bytes exceeds cap of {MAX_BODY_BYTES}"
        )));
    }

    let body_start = sep + HEADER_TERMINATOR.len();
    let frame_end = body_start + content_length;
    if data.len() < frame_end {
        return Ok(None);
    }

    let value: Value = serde_json::from_slice(&data[body_start..frame_end])
        .map_err(|e| DapError::MalformedFrame(format!("body is not valid JSON: {e}")))?;
    Ok(Some((value, frame_end)))
}

/// Incremental frame decoder for a byte stream.
///
/// Feed raw bytes with [`FrameDecoder::extend`] and drain complete frames
/// with [`FrameDecoder::next_frame`]. Consumed bytes are dropped from the
/// internal buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes received from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered, not-yet-decoded bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Value>, DapError> {
        match decode_frame(&self.buf)? {
            Some((value, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn find_terminator(data: &[u8]) -> Option<usize> {
    data.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

fn parse_content_length(header: &str) -> Result<usize, DapError> {
    for line in header.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let value = value.trim();
                return value.parse::<usize>().map_err(|e| {
                    DapError::MalformedFrame(format!("invalid Content-Length '{value}': {e}"))
                });
            }
        }
    }
    Err(DapError::MalformedFrame(
        "missing Content-Length header".into(),
    ))
}
