#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use tracer_dictionary::ServiceDictionary;
use tracer_parser::{ByteCursor, LineParser};
use tracer_store::{BlockWindow, OutputBuffer, OutputSink, RequestStore, StoreError};
use tracer_types::Calendar;

fn calendar() -> Arc<Calendar> {
    static CALENDAR: OnceLock<Arc<Calendar>> = OnceLock::new();
    Arc::clone(CALENDAR.get_or_init(|| Arc::new(Calendar::with_years(1970, 2100).unwrap())))
}

struct Collect {
    buffer: OutputBuffer,
    written: Vec<u8>,
}

impl OutputSink for Collect {
    fn buffer(&mut self) -> &mut OutputBuffer {
        &mut self.buffer
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.written.extend_from_slice(self.buffer.as_slice());
        self.buffer.clear();
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let calendar = calendar();
    let mut dict = ServiceDictionary::new();
    let mut parser = LineParser::new(Arc::clone(&calendar));
    let mut store = RequestStore::new(Arc::clone(&calendar), 60_000);

    // Every two calls must consume at least one byte: a rejected line is
    // rewound once, then skipped.
    let mut cursor = ByteCursor::new(data);
    let mut newest = 0;
    while !cursor.is_empty() {
        let before = cursor.position();
        for _ in 0..2 {
            if let Some(end) = parser.parse(&mut cursor, &mut dict, &mut store) {
                newest = newest.max(end);
            }
        }
        assert!(cursor.position() > before, "parser stalled at {before}");
    }

    // Whatever was accepted must render as valid JSON lines. Names and ids
    // are raw bytes, so only the structure is checked.
    let mut sink = Collect {
        buffer: OutputBuffer::with_capacity(1 << 16),
        written: Vec::new(),
    };
    let window = BlockWindow {
        block_id: 0,
        oldest: 0,
        newest,
        terminal: true,
    };
    if store.finalize_block(window, None, &mut dict, &mut sink).is_ok() {
        sink.flush().unwrap();
        let text = String::from_utf8_lossy(&sink.written);
        for line in text.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
});
