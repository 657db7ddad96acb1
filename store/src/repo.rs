//! Request Store: one worker's live requests for the block it is working on.

use std::collections::HashMap;
use std::sync::Arc;

use tracer_dictionary::ServiceDictionary;
use tracer_parser::LineSink;
use tracer_types::{Calendar, RequestId, SpanEvent};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::json::{JsonError, JsonWriter, OutputBuffer, WriteOutcome};
use crate::request::Request;

/// Requests still open at a block boundary, keyed by id.
pub type TransitMap = HashMap<RequestId, Request>;

/// Destination of rendered requests.
pub trait OutputSink {
    /// The buffer currently being filled.
    fn buffer(&mut self) -> &mut OutputBuffer;

    /// Hand the current buffer on and continue with an empty one.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Time bounds of the block being finalised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockWindow {
    pub block_id: u64,
    /// Smallest end timestamp of an accepted line, 0 if none.
    pub oldest: u64,
    /// Largest end timestamp of an accepted line, 0 if none.
    pub newest: u64,
    /// Last block of the stream: nothing stays open.
    pub terminal: bool,
}

impl BlockWindow {
    /// Whether a request whose newest line ended at `newest_line` may still
    /// receive lines from a later block.
    fn keeps_open(&self, newest_line: u64, expire_after_ms: u64) -> bool {
        if self.terminal {
            return false;
        }
        // A block without lines says nothing about time passing.
        self.newest == 0 || newest_line.saturating_add(expire_after_ms) >= self.newest
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub requests_completed: u64,
    pub requests_skipped: u64,
    pub requests_merged: u64,
    pub span_conflicts: u64,
    pub max_fan_out: u64,
}

pub struct RequestStore {
    requests: HashMap<RequestId, Request>,
    calendar: Arc<Calendar>,
    expire_after_ms: u64,
    stats: StoreStats,
}

impl RequestStore {
    pub fn new(calendar: Arc<Calendar>, expire_after_ms: u64) -> Self {
        Self {
            requests: HashMap::new(),
            calendar,
            expire_after_ms,
            stats: StoreStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn take_stats(&mut self) -> StoreStats {
        std::mem::take(&mut self.stats)
    }

    /// Record one parsed line under its request.
    pub fn record_line(&mut self, event: SpanEvent) {
        let request = self
            .requests
            .entry(event.request)
            .or_insert_with(|| Request::new(event.request));
        let outcome = request.record(&event);
        if outcome.conflict {
            self.stats.span_conflicts += 1;
            warn!(
                request = %event.request,
                span = %event.callee,
                "span used twice, keeping the first definition"
            );
        }
        self.stats.max_fan_out = self.stats.max_fan_out.max(outcome.fan_out as u64);
    }

    /// Close the current block.
    ///
    /// Every tracked request is merged with its forwarded counterpart from
    /// the previous block, if any, before it is classified. That leaves two
    /// outcomes: requests whose newest line is within the expiry window of
    /// the block's newest line may still grow and are returned as the
    /// forward set for the next block; all others are written to `sink`.
    /// Forwarded requests without local activity are treated the same way.
    /// The store is empty afterwards.
    pub fn finalize_block(
        &mut self,
        window: BlockWindow,
        forwarded: Option<TransitMap>,
        dict: &mut ServiceDictionary,
        sink: &mut impl OutputSink,
    ) -> Result<TransitMap, StoreError> {
        let mut forwarded = forwarded.unwrap_or_default();
        let mut forward = TransitMap::new();
        let (mut open, mut closed, mut merged) = (0usize, 0usize, 0usize);

        let mut requests = std::mem::take(&mut self.requests);
        for (id, mut request) in requests.drain() {
            if let Some(theirs) = forwarded.remove(&id) {
                self.merge(&mut request, theirs);
                merged += 1;
            }
            if window.keeps_open(request.newest_line(), self.expire_after_ms) {
                open += 1;
                forward.insert(id, request);
            } else {
                closed += 1;
                self.emit(&request, dict, sink)?;
            }
        }
        self.requests = requests;

        let carried = forwarded.len();
        for (id, request) in forwarded.drain() {
            if window.keeps_open(request.newest_line(), self.expire_after_ms) {
                forward.insert(id, request);
            } else {
                self.emit(&request, dict, sink)?;
            }
        }

        debug!(
            block = window.block_id,
            oldest = window.oldest,
            newest = window.newest,
            open,
            closed,
            merged,
            carried,
            forward = forward.len(),
            terminal = window.terminal,
            "block finalized"
        );
        Ok(forward)
    }

    fn merge(&mut self, local: &mut Request, forwarded: Request) {
        let outcome = local.merge(forwarded);
        self.stats.requests_merged += 1;
        for span in &outcome.conflicts {
            warn!(
                request = %local.id(),
                span = %span,
                "span used twice across blocks, keeping the local definition"
            );
        }
        self.stats.span_conflicts += outcome.conflicts.len() as u64;
    }

    /// Write one request, flushing the sink when its buffer is full.
    fn emit(
        &mut self,
        request: &Request,
        dict: &mut ServiceDictionary,
        sink: &mut impl OutputSink,
    ) -> Result<(), StoreError> {
        let mut writer = JsonWriter::new(&self.calendar, dict);
        loop {
            match writer.write_request(sink.buffer(), request) {
                Ok(WriteOutcome::Written) => {
                    self.stats.requests_completed += 1;
                    return Ok(());
                }
                Ok(WriteOutcome::Skipped) => {
                    self.stats.requests_skipped += 1;
                    debug!(request = %request.id(), "dropping request without a root call");
                    return Ok(());
                }
                Err(JsonError::BufferFull) => {
                    let buffer = sink.buffer();
                    if buffer.is_empty() {
                        return Err(StoreError::RequestTooLarge {
                            request: request.id(),
                            capacity: buffer.capacity(),
                        });
                    }
                    sink.flush()?;
                }
                Err(JsonError::UnknownService(service)) => {
                    return Err(StoreError::UnknownService(service));
                }
                Err(JsonError::Cycle(span)) => {
                    self.stats.requests_skipped += 1;
                    warn!(request = %request.id(), span = %span, "dropping request with a cyclic call tree");
                    return Ok(());
                }
            }
        }
    }
}

impl LineSink for RequestStore {
    fn record(&mut self, event: SpanEvent) {
        self.record_line(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracer_types::{ServiceId, SpanId, NULL_SPAN};

    const EXPIRE: u64 = 1_000;

    /// Collects flushed buffers in memory.
    struct MemorySink {
        current: OutputBuffer,
        flushed: Vec<Vec<u8>>,
    }

    impl MemorySink {
        fn new(capacity: usize) -> Self {
            Self {
                current: OutputBuffer::with_capacity(capacity),
                flushed: Vec::new(),
            }
        }

        fn text(&self) -> String {
            let mut all: Vec<u8> = self.flushed.concat();
            all.extend_from_slice(self.current.as_slice());
            String::from_utf8(all).unwrap()
        }
    }

    impl OutputSink for MemorySink {
        fn buffer(&mut self) -> &mut OutputBuffer {
            &mut self.current
        }

        fn flush(&mut self) -> Result<(), StoreError> {
            let capacity = self.current.capacity();
            let full = std::mem::replace(&mut self.current, OutputBuffer::with_capacity(capacity));
            self.flushed.push(full.into_vec());
            Ok(())
        }
    }

    fn store() -> RequestStore {
        RequestStore::new(Arc::new(Calendar::with_years(1970, 1972).unwrap()), EXPIRE)
    }

    fn event(request: &[u8; 8], started: u64, ended: u64, caller: SpanId, callee: &[u8; 8]) -> SpanEvent {
        SpanEvent {
            service: ServiceId::new(1),
            request: RequestId::from_bytes(*request),
            started,
            ended,
            caller,
            callee: SpanId::from_bytes(*callee),
        }
    }

    fn dict() -> ServiceDictionary {
        let mut dict = ServiceDictionary::new();
        dict.add(b"service1");
        dict
    }

    fn window(block_id: u64, oldest: u64, newest: u64) -> BlockWindow {
        BlockWindow {
            block_id,
            oldest,
            newest,
            terminal: false,
        }
    }

    #[test]
    fn record_line_builds_tree() {
        let mut store = store();
        store.record_line(event(b"4twlb5e6", 0, 3, NULL_SPAN, b"vmrya5qg"));
        let request = store.get(RequestId::from_bytes(*b"4twlb5e6")).unwrap();
        let root = request.root().unwrap();
        assert_eq!((root.started(), root.ended()), (0, 3));
        assert_eq!(root.service(), ServiceId::new(1));
        assert_eq!(store.stats().max_fan_out, 1);
    }

    #[test]
    fn childless_request_is_skipped_without_output() {
        let mut store = store();
        let mut sink = MemorySink::new(1_000);
        store.record_line(event(b"reqreqre", 1, 2, SpanId::from_bytes(*b"parentxx"), b"childxxx"));

        let terminal = BlockWindow { terminal: true, ..window(0, 2, 2) };
        let forward = store.finalize_block(terminal, None, &mut dict(), &mut sink).unwrap();

        assert!(forward.is_empty());
        assert!(sink.current.is_empty());
        assert_eq!(store.stats().requests_skipped, 1);
        assert_eq!(store.stats().requests_completed, 0);
    }

    #[test]
    fn open_requests_are_forwarded_and_expired_ones_written() {
        let mut store = store();
        let mut sink = MemorySink::new(1_000);
        let mut dict = dict();
        store.record_line(event(b"oldoldol", 0, 10, NULL_SPAN, b"aaaaaaaa"));
        store.record_line(event(b"newnewne", 4_000, 5_000, NULL_SPAN, b"bbbbbbbb"));

        let forward = store
            .finalize_block(window(0, 10, 5_000), None, &mut dict, &mut sink)
            .unwrap();

        assert!(store.is_empty());
        assert_eq!(forward.len(), 1);
        assert!(forward.contains_key(&RequestId::from_bytes(*b"newnewne")));
        assert!(sink.text().starts_with("{\"id\":\"oldoldol\""));
        assert_eq!(store.stats().requests_completed, 1);
    }

    #[test]
    fn split_request_is_merged_before_writing() {
        let mut store = store();
        let mut sink = MemorySink::new(1_000);
        let mut dict = dict();

        store.record_line(event(b"splitreq", 0, 500, NULL_SPAN, b"aaaaaaaa"));
        let forward = store.finalize_block(window(0, 500, 500), None, &mut dict, &mut sink).unwrap();
        assert_eq!(forward.len(), 1);
        assert!(sink.current.is_empty());

        store.record_line(event(b"splitreq", 100, 600, SpanId::from_bytes(*b"aaaaaaaa"), b"bbbbbbbb"));
        store.record_line(event(b"laterreq", 4_900, 5_000, NULL_SPAN, b"cccccccc"));
        let forward = store
            .finalize_block(window(1, 600, 5_000), Some(forward), &mut dict, &mut sink)
            .unwrap();

        assert_eq!(store.stats().requests_merged, 1);
        assert_eq!(forward.len(), 1);
        let text = sink.text();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"calls\":[{\"start\":\"1970-01-01 00:00:00.100\""), "{text}");

        let terminal = BlockWindow { terminal: true, ..window(2, 0, 0) };
        let rest = store.finalize_block(terminal, Some(forward), &mut dict, &mut sink).unwrap();
        assert!(rest.is_empty());
        assert_eq!(sink.text().lines().count(), 2);
    }

    #[test]
    fn forwarded_requests_without_activity_expire() {
        let mut store = store();
        let mut sink = MemorySink::new(1_000);
        let mut dict = dict();
        store.record_line(event(b"quietreq", 0, 100, NULL_SPAN, b"aaaaaaaa"));
        let forward = store.finalize_block(window(0, 100, 100), None, &mut dict, &mut sink).unwrap();

        // A block with no lines keeps everything open.
        let forward = store.finalize_block(window(1, 0, 0), Some(forward), &mut dict, &mut sink).unwrap();
        assert_eq!(forward.len(), 1);

        store.record_line(event(b"otherreq", 9_000, 9_500, NULL_SPAN, b"bbbbbbbb"));
        let forward = store
            .finalize_block(window(2, 9_500, 9_500), Some(forward), &mut dict, &mut sink)
            .unwrap();
        assert_eq!(forward.len(), 1);
        assert!(sink.text().starts_with("{\"id\":\"quietreq\""));
    }

    #[test]
    fn full_buffer_flushes_at_request_boundary() {
        let mut dict = dict();
        let mut probe = store();
        let mut measure = MemorySink::new(10_000);
        probe.record_line(event(b"request1", 0, 3, NULL_SPAN, b"aaaaaaaa"));
        probe
            .finalize_block(BlockWindow { terminal: true, ..window(0, 3, 3) }, None, &mut dict, &mut measure)
            .unwrap();
        let one = measure.text().len();

        let mut store = store();
        let mut sink = MemorySink::new(one + 20);
        store.record_line(event(b"request1", 0, 3, NULL_SPAN, b"aaaaaaaa"));
        store.record_line(event(b"request2", 0, 3, NULL_SPAN, b"bbbbbbbb"));
        store
            .finalize_block(BlockWindow { terminal: true, ..window(0, 3, 3) }, None, &mut dict, &mut sink)
            .unwrap();

        assert_eq!(sink.flushed.len(), 1);
        assert_eq!(sink.flushed[0].len(), one);
        assert!(sink.flushed[0].ends_with(b"}\n"));
        assert_eq!(sink.current.len(), one);
        assert_eq!(store.stats().requests_completed, 2);
    }

    #[test]
    fn request_larger_than_buffer_is_fatal() {
        let mut store = store();
        let mut sink = MemorySink::new(20);
        store.record_line(event(b"request1", 0, 3, NULL_SPAN, b"aaaaaaaa"));
        let err = store
            .finalize_block(BlockWindow { terminal: true, ..window(0, 3, 3) }, None, &mut dict(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, StoreError::RequestTooLarge { capacity: 20, .. }));
        assert!(sink.current.is_empty());
    }

    #[test]
    fn duplicate_span_lines_are_counted() {
        let mut store = store();
        store.record_line(event(b"request1", 0, 3, NULL_SPAN, b"aaaaaaaa"));
        store.record_line(event(b"request1", 1, 2, NULL_SPAN, b"aaaaaaaa"));
        assert_eq!(store.stats().span_conflicts, 1);
        assert_eq!(store.take_stats().span_conflicts, 1);
        assert_eq!(store.stats(), StoreStats::default());
    }
}
