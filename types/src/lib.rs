//! Fundamental types for the tracer.
//!
//! Defines what every other crate in the workspace shares: the 8-byte id
//! tokens read from log lines, interned service ids, and the timestamp
//! codec used to read log timestamps and render trace dates.

pub mod error;
pub mod event;
pub mod service;
pub mod time;
pub mod token;

pub use error::TimestampError;
pub use event::SpanEvent;
pub use service::ServiceId;
pub use time::{Calendar, DATE_LEN, TIMESTAMP_LEN};
pub use token::{is_null_marker, RequestId, SpanId, ARROW, NULL_MARKER, NULL_SPAN, TOKEN_LEN};
