//! One parsed caller→callee log line.

use crate::{RequestId, ServiceId, SpanId};

/// Structured content of one well-formed log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanEvent {
    pub service: ServiceId,
    pub request: RequestId,
    /// Epoch milliseconds.
    pub started: u64,
    /// Epoch milliseconds.
    pub ended: u64,
    /// [`NULL_SPAN`](crate::NULL_SPAN) when the line has no caller.
    pub caller: SpanId,
    pub callee: SpanId,
}
