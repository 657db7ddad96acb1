//! Line Parser: decodes one log line per call.
//!
//! Line layout:
//!
//! ```text
//! <start-ts> <end-ts> <request> <service> <caller>-><callee>\n
//! <start-ts> <end-ts> <request> <service> null-><callee>\n
//! ```
//!
//! Timestamps are `YYYY-MM-DDTHH:MM:SS.mmmZ`; request, caller and callee
//! are 8-byte tokens read as little-endian words.

use std::sync::Arc;

use tracer_dictionary::ServiceDictionary;
use tracer_types::{
    is_null_marker, Calendar, RequestId, SpanEvent, SpanId, ARROW, NULL_MARKER, NULL_SPAN,
    TIMESTAMP_LEN, TOKEN_LEN,
};
use tracing::{debug, trace};

use crate::cursor::ByteCursor;

/// Receiver of successfully parsed lines.
pub trait LineSink {
    fn record(&mut self, event: SpanEvent);
}

impl<F: FnMut(SpanEvent)> LineSink for F {
    fn record(&mut self, event: SpanEvent) {
        self(event)
    }
}

/// Line counters since the last [`LineParser::take_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub lines_accepted: u64,
    pub lines_dropped: u64,
}

/// Result of parsing one newline-aligned block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub accepted: u64,
    /// Smallest end timestamp among accepted lines, 0 if none.
    pub oldest: u64,
    /// Largest end timestamp among accepted lines, 0 if none.
    pub newest: u64,
}

impl BlockSummary {
    fn observe(&mut self, ended: u64) {
        self.accepted += 1;
        self.newest = self.newest.max(ended);
        self.oldest = if self.oldest == 0 {
            ended
        } else {
            self.oldest.min(ended)
        };
    }
}

/// Why a line was rejected. Only used for debug logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reject {
    StartTimestamp,
    EndTimestamp,
    Separator(&'static str),
    RequestToken,
    ServiceName,
    CallerToken,
    Arrow,
    CalleeToken,
    LineEnd,
}

/// Stateful line parser.
///
/// The only state carried between calls is the resynchronisation flag: after
/// a malformed line the next call skips to the following newline and
/// produces nothing.
pub struct LineParser {
    calendar: Arc<Calendar>,
    resync: bool,
    stats: ParserStats,
}

impl LineParser {
    pub fn new(calendar: Arc<Calendar>) -> Self {
        Self {
            calendar,
            resync: false,
            stats: ParserStats::default(),
        }
    }

    pub fn is_resyncing(&self) -> bool {
        self.resync
    }

    /// Forget any pending resynchronisation. Blocks always start on a line
    /// boundary, so this is called once per block.
    pub fn reset(&mut self) {
        self.resync = false;
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> ParserStats {
        std::mem::take(&mut self.stats)
    }

    /// Parse one line at the cursor.
    ///
    /// Returns the line's end timestamp when a span was forwarded to `sink`.
    /// `None` means either a resynchronisation step or a rejected line; in
    /// both cases the caller keeps calling until the cursor is exhausted.
    pub fn parse(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        dict: &mut ServiceDictionary,
        sink: &mut impl LineSink,
    ) -> Option<u64> {
        if self.resync {
            if cursor.skip_line() {
                self.resync = false;
            }
            return None;
        }
        if cursor.is_empty() {
            return None;
        }

        let line_start = cursor.position();
        match self.parse_fields(cursor, dict) {
            Ok(event) => {
                self.stats.lines_accepted += 1;
                sink.record(event);
                Some(event.ended)
            }
            Err(reason) => {
                self.stats.lines_dropped += 1;
                debug!(?reason, offset = line_start, "dropping malformed line");
                // Rewind so the resync step skips exactly the broken line,
                // even when a bad token swallowed its newline.
                cursor.rewind_to(line_start);
                self.resync = true;
                None
            }
        }
    }

    /// Parse every line of `block` and summarise the accepted ones.
    pub fn parse_block(
        &mut self,
        block: &[u8],
        dict: &mut ServiceDictionary,
        sink: &mut impl LineSink,
    ) -> BlockSummary {
        self.reset();
        let mut summary = BlockSummary::default();
        let mut cursor = ByteCursor::new(block);
        while !cursor.is_empty() {
            if let Some(ended) = self.parse(&mut cursor, dict, sink) {
                summary.observe(ended);
            }
        }
        trace!(bytes = block.len(), accepted = summary.accepted, "block parsed");
        summary
    }

    fn parse_fields(
        &self,
        cursor: &mut ByteCursor<'_>,
        dict: &mut ServiceDictionary,
    ) -> Result<SpanEvent, Reject> {
        let started = self.timestamp(cursor).ok_or(Reject::StartTimestamp)?;
        separator(cursor, b' ', "after start")?;
        let ended = self.timestamp(cursor).ok_or(Reject::EndTimestamp)?;
        separator(cursor, b' ', "after end")?;
        let request = cursor.read_u64_le().ok_or(Reject::RequestToken)?;
        separator(cursor, b' ', "after request")?;

        let name = service_token(cursor)?;

        let raw_caller = cursor.peek_u64_le().ok_or(Reject::CallerToken)?;
        let caller = if is_null_marker(raw_caller) {
            cursor.advance(NULL_MARKER.len());
            NULL_SPAN
        } else {
            cursor.advance(TOKEN_LEN);
            if !cursor.eat(ARROW) {
                return Err(Reject::Arrow);
            }
            SpanId::from_raw(raw_caller)
        };

        let callee = cursor.read_u64_le().ok_or(Reject::CalleeToken)?;
        separator(cursor, b'\n', "").map_err(|_| Reject::LineEnd)?;

        Ok(SpanEvent {
            service: dict.add(name),
            request: RequestId::from_raw(request),
            started,
            ended,
            caller,
            callee: SpanId::from_raw(callee),
        })
    }

    fn timestamp(&self, cursor: &mut ByteCursor<'_>) -> Option<u64> {
        let millis = self.calendar.read_timestamp(cursor.rest()).ok()?;
        cursor.advance(TIMESTAMP_LEN);
        Some(millis)
    }
}

fn separator(cursor: &mut ByteCursor<'_>, expected: u8, what: &'static str) -> Result<(), Reject> {
    match cursor.read_u8() {
        Some(b) if b == expected => Ok(()),
        _ => Err(Reject::Separator(what)),
    }
}

/// Service name up to the next space. A newline or end of input first means
/// the line has no span tokens.
fn service_token<'a>(cursor: &mut ByteCursor<'a>) -> Result<&'a [u8], Reject> {
    let rest = cursor.rest();
    let end = rest
        .iter()
        .position(|&b| b == b' ' || b == b'\n')
        .ok_or(Reject::ServiceName)?;
    if end == 0 || rest[end] != b' ' {
        return Err(Reject::ServiceName);
    }
    cursor.advance(end + 1);
    Ok(&rest[..end])
}
