//! Worker: parses blocks, stitches requests across block boundaries and
//! renders finished requests into output buffers.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracer_dictionary::ServiceDictionary;
use tracer_parser::LineParser;
use tracer_store::{BlockWindow, OutputBuffer, OutputSink, RequestStore, StoreError, TransitMap};
use tracer_types::Calendar;
use tracing::{debug, error, info};

use crate::block::{Block, WorkItem, WriterItem};
use crate::bus::TransitBus;
use crate::config::TracerConfig;
use crate::metrics::PipelineMetrics;
use crate::tracing_spans;
use crate::PipelineError;

/// Output side of a worker: fills one pooled buffer at a time and trades
/// it for a drained one when full.
pub struct ChannelSink {
    current: OutputBuffer,
    capacity: usize,
    filled: Sender<WriterItem>,
    drained: Receiver<Vec<u8>>,
}

impl ChannelSink {
    /// Take the first buffer from the pool.
    pub fn new(
        capacity: usize,
        filled: Sender<WriterItem>,
        drained: Receiver<Vec<u8>>,
    ) -> Result<Self, PipelineError> {
        let first = drained
            .recv()
            .map_err(|_| PipelineError::Disconnected("output buffer pool"))?;
        Ok(Self {
            current: OutputBuffer::from_vec(first, capacity),
            capacity,
            filled,
            drained,
        })
    }

    /// Send whatever is buffered, then tell the writer this worker is done.
    fn finish(mut self) -> Result<(), StoreError> {
        if !self.current.is_empty() {
            let last = std::mem::replace(&mut self.current, OutputBuffer::with_capacity(0));
            self.filled
                .send(WriterItem::Buffer(last.into_vec()))
                .map_err(|_| StoreError::OutputClosed)?;
        }
        self.filled
            .send(WriterItem::Exit)
            .map_err(|_| StoreError::OutputClosed)
    }
}

impl OutputSink for ChannelSink {
    fn buffer(&mut self) -> &mut OutputBuffer {
        &mut self.current
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let full = std::mem::replace(&mut self.current, OutputBuffer::with_capacity(0));
        self.filled
            .send(WriterItem::Buffer(full.into_vec()))
            .map_err(|_| StoreError::OutputClosed)?;
        let drained = self.drained.recv().map_err(|_| StoreError::OutputClosed)?;
        self.current = OutputBuffer::from_vec(drained, self.capacity);
        Ok(())
    }
}

/// Channels and shared state handed to every worker.
#[derive(Clone)]
pub struct WorkerLinks {
    pub blocks: Receiver<WorkItem>,
    pub free_input: Sender<Vec<u8>>,
    pub filled: Sender<WriterItem>,
    pub drained: Receiver<Vec<u8>>,
    pub bus: Arc<TransitBus<TransitMap>>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Poisons the bus if the worker thread unwinds.
struct PoisonOnPanic(Arc<TransitBus<TransitMap>>);

impl Drop for PoisonOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.poison();
        }
    }
}

pub struct Worker {
    id: usize,
    links: WorkerLinks,
    parser: LineParser,
    store: RequestStore,
    dict: ServiceDictionary,
    write_buffer_bytes: usize,
    flush_check_lines: u64,
    lines_since_report: u64,
}

impl Worker {
    pub fn new(
        id: usize,
        links: WorkerLinks,
        calendar: Arc<Calendar>,
        dict: ServiceDictionary,
        config: &TracerConfig,
    ) -> Self {
        Self {
            id,
            links,
            parser: LineParser::new(Arc::clone(&calendar)),
            store: RequestStore::new(calendar, config.expire_after_ms),
            dict,
            write_buffer_bytes: config.write_buffer_bytes,
            flush_check_lines: config.flush_check_lines,
            lines_since_report: 0,
        }
    }

    /// Process blocks until an exit sentinel arrives or the reader goes
    /// away. On a fatal error the bus is poisoned so that no other worker
    /// waits forever for this worker's block.
    pub fn run(mut self) -> Result<(), PipelineError> {
        let span = tracing_spans::worker_span(self.id);
        let _enter = span.enter();
        let _guard = PoisonOnPanic(Arc::clone(&self.links.bus));
        info!("worker started");

        let filled = self.links.filled.clone();
        let drained = self.links.drained.clone();
        let mut sink = match ChannelSink::new(self.write_buffer_bytes, filled, drained) {
            Ok(sink) => sink,
            Err(e) => {
                self.links.bus.poison();
                return Err(e);
            }
        };

        let result = self.process_blocks(&mut sink);
        if let Err(e) = &result {
            if e.is_secondary() {
                debug!(error = %e, "worker stopping after another thread failed");
            } else {
                error!(error = %e, "worker failed");
            }
            self.links.bus.poison();
        }
        self.report();
        let finished = sink.finish();
        info!("worker terminated");
        result?;
        finished.map_err(PipelineError::from)
    }

    fn process_blocks(&mut self, sink: &mut ChannelSink) -> Result<(), PipelineError> {
        loop {
            match self.links.blocks.recv() {
                Ok(WorkItem::Block(block)) => self.process_block(block, sink)?,
                Ok(WorkItem::Exit) => {
                    debug!("got exit sentinel");
                    return Ok(());
                }
                Err(_) => {
                    debug!("block channel closed");
                    return Ok(());
                }
            }
        }
    }

    fn process_block(&mut self, block: Block, sink: &mut ChannelSink) -> Result<(), PipelineError> {
        let Block { seq, data, terminal } = block;
        let span = tracing_spans::block_span(seq, data.len(), terminal);
        let _enter = span.enter();

        let summary = self.parser.parse_block(&data, &mut self.dict, &mut self.store);
        // The reader may already be gone after the terminal block.
        let _ = self.links.free_input.send(data);

        let forwarded = if seq == 0 {
            None
        } else {
            Some(self.links.bus.get(seq - 1)?)
        };
        let window = BlockWindow {
            block_id: seq,
            oldest: summary.oldest,
            newest: summary.newest,
            terminal,
        };
        let forward = self
            .store
            .finalize_block(window, forwarded, &mut self.dict, sink)?;

        self.links
            .metrics
            .requests_in_transit
            .set(i64::try_from(forward.len()).unwrap_or(i64::MAX));
        if !terminal {
            self.links.bus.put(seq, forward)?;
        }

        self.lines_since_report += summary.accepted;
        if self.lines_since_report >= self.flush_check_lines {
            self.report();
        }
        Ok(())
    }

    /// Publish counters accumulated since the last report.
    fn report(&mut self) {
        let parser = self.parser.take_stats();
        let store = self.store.take_stats();
        debug!(
            accepted = parser.lines_accepted,
            dropped = parser.lines_dropped,
            completed = store.requests_completed,
            skipped = store.requests_skipped,
            merged = store.requests_merged,
            conflicts = store.span_conflicts,
            max_fan_out = store.max_fan_out,
            "worker statistics"
        );
        self.links.metrics.record_worker(parser, store);
        self.lines_since_report = 0;
    }
}
