//! JSON rendering of finished requests into fixed-capacity buffers.
//!
//! Output for one request:
//!
//! ```text
//! {"id":"<request>","root":{"start":"..","end":"..","service":"..","calls":[..]}}\n
//! ```
//!
//! A request is written completely or not at all: when the buffer runs out
//! of room the partial bytes are cut off again and [`JsonError::BufferFull`]
//! is returned, so the caller can flush and retry from the same request.

use thiserror::Error;
use tracer_dictionary::ServiceDictionary;
use tracer_types::{Calendar, ServiceId, SpanId, DATE_LEN};
use tracing::warn;

use crate::request::Request;
use crate::span::Span;

const ID_OPEN: &[u8] = b"{\"id\":\"";
const ROOT_OPEN: &[u8] = b"\",\"root\":";
const REQUEST_CLOSE: &[u8] = b"}\n";
const START_OPEN: &[u8] = b"{\"start\":\"";
const END_OPEN: &[u8] = b"\",\"end\":\"";
const SERVICE_OPEN: &[u8] = b"\",\"service\":\"";
const CALLS_OPEN: &[u8] = b"\",\"calls\":[";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// No root span, or a root without children. Nothing was written.
    Skipped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JsonError {
    #[error("output buffer has no room for the request")]
    BufferFull,

    #[error("service id {0} was never interned")]
    UnknownService(ServiceId),

    #[error("span {0} is its own ancestor")]
    Cycle(SpanId),
}

/// Byte buffer that refuses to grow past a fixed capacity.
///
/// Wraps the `Vec<u8>` handles that circulate between workers and the
/// writer.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_vec(Vec::with_capacity(capacity), capacity)
    }

    /// Reuse a drained buffer. Any leftover content is discarded.
    pub fn from_vec(mut bytes: Vec<u8>, capacity: usize) -> Self {
        bytes.clear();
        bytes.reserve(capacity);
        Self { bytes, capacity }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.bytes.len()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    fn put(&mut self, data: &[u8]) -> Result<(), JsonError> {
        if data.len() > self.remaining() {
            return Err(JsonError::BufferFull);
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    fn put_byte(&mut self, byte: u8) -> Result<(), JsonError> {
        self.put(&[byte])
    }

    /// Write `data` as the inside of a JSON string.
    fn put_escaped(&mut self, data: &[u8]) -> Result<(), JsonError> {
        let mut plain = 0;
        for (i, &b) in data.iter().enumerate() {
            let escape: &[u8] = match b {
                b'"' => b"\\\"",
                b'\\' => b"\\\\",
                b'\n' => b"\\n",
                b'\r' => b"\\r",
                b'\t' => b"\\t",
                0..=0x1f => b"",
                _ => continue,
            };
            self.put(&data[plain..i])?;
            if escape.is_empty() {
                self.put(&control_escape(b))?;
            } else {
                self.put(escape)?;
            }
            plain = i + 1;
        }
        self.put(&data[plain..])
    }
}

fn control_escape(b: u8) -> [u8; 6] {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    [b'\\', b'u', b'0', b'0', HEX[usize::from(b >> 4)], HEX[usize::from(b & 0xf)]]
}

/// Renders requests using one worker's dictionary view.
pub struct JsonWriter<'a> {
    calendar: &'a Calendar,
    dict: &'a mut ServiceDictionary,
}

impl<'a> JsonWriter<'a> {
    pub fn new(calendar: &'a Calendar, dict: &'a mut ServiceDictionary) -> Self {
        Self { calendar, dict }
    }

    /// Append one request as a JSON line.
    ///
    /// On error the buffer is left exactly as it was.
    pub fn write_request(
        &mut self,
        out: &mut OutputBuffer,
        request: &Request,
    ) -> Result<WriteOutcome, JsonError> {
        let Some(root) = request.root() else {
            return Ok(WriteOutcome::Skipped);
        };
        if request.root_count() > 1 {
            warn!(
                request = %request.id(),
                roots = request.root_count(),
                "request has several root spans, rendering the earliest"
            );
        }

        let mark = out.len();
        let result = self.write_document(out, request, root);
        if result.is_err() {
            out.truncate(mark);
        }
        result.map(|()| WriteOutcome::Written)
    }

    fn write_document(
        &mut self,
        out: &mut OutputBuffer,
        request: &Request,
        root: &Span,
    ) -> Result<(), JsonError> {
        out.put(ID_OPEN)?;
        out.put_escaped(&request.id().to_bytes())?;
        out.put(ROOT_OPEN)?;
        self.write_span(out, request, root, 0)?;
        out.put(REQUEST_CLOSE)
    }

    fn write_span(
        &mut self,
        out: &mut OutputBuffer,
        request: &Request,
        span: &Span,
        depth: usize,
    ) -> Result<(), JsonError> {
        // A path longer than the span count must revisit a span.
        if depth > request.span_count() {
            return Err(JsonError::Cycle(span.id()));
        }

        let mut date = [0u8; DATE_LEN];
        out.put(START_OPEN)?;
        self.calendar.write_date(&mut date, span.started());
        out.put(&date)?;
        out.put(END_OPEN)?;
        self.calendar.write_date(&mut date, span.ended());
        out.put(&date)?;
        out.put(SERVICE_OPEN)?;
        let name = self
            .dict
            .resolve(span.service())
            .ok_or(JsonError::UnknownService(span.service()))?;
        out.put_escaped(name)?;

        let mut children = span
            .children()
            .iter()
            .filter_map(|child| request.span(child.id))
            .peekable();
        if children.peek().is_none() {
            out.put_byte(b'"')?;
        } else {
            out.put(CALLS_OPEN)?;
            for (i, child) in children.enumerate() {
                if i > 0 {
                    out.put_byte(b',')?;
                }
                self.write_span(out, request, child, depth + 1)?;
            }
            out.put_byte(b']')?;
        }
        out.put_byte(b'}')
    }
}
