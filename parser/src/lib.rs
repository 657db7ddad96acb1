//! Zero-allocation parsing of span log lines.
//!
//! [`LineParser`] reads one line at a time from a [`ByteCursor`], interns
//! the service name and hands the decoded [`SpanEvent`](tracer_types::SpanEvent)
//! to a [`LineSink`].

pub mod cursor;
pub mod line;

pub use cursor::ByteCursor;
pub use line::{BlockSummary, LineParser, LineSink, ParserStats};
