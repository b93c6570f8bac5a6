//! Event-stream encoder and decoder
//!
//! The decoder is incremental: bytes are appended to a `BytesMut` as they
//! arrive from the network and [`SseDecoder::decode`] pulls complete records
//! out of it. Malformed input never produces an error; offending lines are
//! skipped and decoding resumes at the next line.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{
    DEFAULT_EVENT_TYPE, DEFAULT_MAX_LINE_LENGTH, FIELD_DATA, FIELD_EVENT, FIELD_ID,
};
use super::event::SseEvent;

/// Incremental event-stream decoder
#[derive(Debug)]
pub struct SseDecoder {
    /// Lines longer than this are dropped
    max_line_length: usize,
    /// Bytes at the front of the buffer already known to hold no terminator
    scanned: usize,
    /// Dropping an oversized line until its terminator shows up
    discarding: bool,
    /// Pending `event:` value
    event_type: Option<String>,
    /// Pending data lines, joined with `\n`
    data: String,
    /// Whether at least one `data:` line was seen for the pending record
    has_data: bool,
    /// Pending `id:` value
    id: Option<String>,
}

impl SseDecoder {
    /// Create a decoder with the default line length limit
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a decoder with a custom line length limit
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            max_line_length: max_line_length.max(1),
            scanned: 0,
            discarding: false,
            event_type: None,
            data: String::new(),
            has_data: false,
            id: None,
        }
    }

    /// Decode the next complete event from `buf`
    ///
    /// Consumed bytes are removed from `buf`. Returns `None` when more input
    /// is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<SseEvent> {
        self.decode_inner(buf, false)
    }

    /// Decode at end of stream
    ///
    /// A trailing `\r` is treated as a line terminator. Call repeatedly until
    /// it returns `None`; after that the decoder is reset and any incomplete
    /// record is discarded.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Option<SseEvent> {
        if let Some(event) = self.decode_inner(buf, true) {
            return Some(event);
        }

        if !buf.is_empty() || self.has_data {
            tracing::debug!(
                pending_bytes = buf.len(),
                "Discarding incomplete event at end of stream"
            );
        }
        buf.clear();
        self.reset();
        None
    }

    /// Drop any partially accumulated record
    pub fn reset(&mut self) {
        self.scanned = 0;
        self.discarding = false;
        self.event_type = None;
        self.data.clear();
        self.has_data = false;
        self.id = None;
    }

    fn decode_inner(&mut self, buf: &mut BytesMut, eof: bool) -> Option<SseEvent> {
        while let Some(line) = self.next_line(buf, eof) {
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        None
    }

    /// Split the next terminated line off the buffer
    fn next_line(&mut self, buf: &mut BytesMut, eof: bool) -> Option<BytesMut> {
        loop {
            self.scanned = self.scanned.min(buf.len());
            let found = buf[self.scanned..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
                .map(|pos| pos + self.scanned);

            let Some(idx) = found else {
                self.scanned = buf.len();
                if buf.len() > self.max_line_length {
                    if !self.discarding {
                        tracing::warn!(
                            limit = self.max_line_length,
                            "Line exceeds maximum length, skipping"
                        );
                    }
                    self.discarding = true;
                    buf.clear();
                    self.scanned = 0;
                }
                return None;
            };

            let terminator_len = if buf[idx] == b'\r' {
                match buf.get(idx + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    None if eof => 1,
                    None => {
                        // `\n` may still follow in the next chunk
                        self.scanned = idx;
                        return None;
                    }
                }
            } else {
                1
            };

            let line = buf.split_to(idx);
            buf.advance(terminator_len);
            self.scanned = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.len() > self.max_line_length {
                tracing::warn!(
                    limit = self.max_line_length,
                    length = line.len(),
                    "Line exceeds maximum length, skipping"
                );
                continue;
            }

            return Some(line);
        }
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keep-alive
        if line[0] == b':' {
            return None;
        }

        let (field, value) = match line.iter().position(|b| *b == b':') {
            Some(colon) => {
                let mut value = &line[colon + 1..];
                if value.first() == Some(&b' ') {
                    value = &value[1..];
                }
                (&line[..colon], value)
            }
            None => (line, &b""[..]),
        };

        match field {
            f if f == FIELD_EVENT.as_bytes() => {
                self.event_type = Some(String::from_utf8_lossy(value).into_owned());
            }
            f if f == FIELD_DATA.as_bytes() => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(&String::from_utf8_lossy(value));
                self.has_data = true;
            }
            f if f == FIELD_ID.as_bytes() => {
                if !value.contains(&0) {
                    self.id = Some(String::from_utf8_lossy(value).into_owned());
                }
            }
            other => {
                tracing::trace!(
                    field = %String::from_utf8_lossy(other),
                    "Ignoring unrecognized field"
                );
            }
        }

        None
    }

    /// Emit the pending record at a blank-line boundary
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        let id = self.id.take();

        // Blank lines with no data in between are keep-alives
        if !self.has_data {
            return None;
        }
        self.has_data = false;

        Some(SseEvent {
            event_type: event_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            data: std::mem::take(&mut self.data),
            id,
        })
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode one event record
///
/// Writes `id:` (when given), `event:`, one `data:` line per payload line and
/// a terminating blank line. Carriage returns trailing a payload line are
/// stripped so that `\r\n` payloads survive the round trip.
pub fn encode_event(buf: &mut BytesMut, id: Option<&str>, event_type: &str, payload: &str) {
    buf.reserve(payload.len() + event_type.len() + 32);

    if let Some(id) = id {
        put_field(buf, FIELD_ID, id);
    }
    put_field(buf, FIELD_EVENT, event_type);

    for line in payload.split('\n') {
        put_field(buf, FIELD_DATA, line.trim_end_matches('\r'));
    }

    buf.put_u8(b'\n');
}

/// Encode a comment frame (ignored by decoders, used as keep-alive)
pub fn encode_comment(buf: &mut BytesMut, text: &str) {
    for line in text.split('\n') {
        buf.put_slice(b": ");
        buf.put_slice(line.trim_end_matches('\r').as_bytes());
        buf.put_u8(b'\n');
    }
    buf.put_u8(b'\n');
}

impl SseEvent {
    /// Encode this event onto `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        encode_event(buf, self.id.as_deref(), &self.event_type, &self.data);
    }
}

fn put_field(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_u8(b'\n');
}
