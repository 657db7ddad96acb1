//! Pre-built [`tracing::Span`] constructors for the pipeline threads.
//!
//! Using consistent span names and field sets makes it easy to filter and
//! correlate the log lines of one block or one thread.

use tracing::{info_span, Span};

/// Span covering the lifetime of the block reader thread.
pub fn reader_span() -> Span {
    info_span!("block_reader")
}

/// Span covering the lifetime of one worker thread.
pub fn worker_span(worker: usize) -> Span {
    info_span!("worker", worker = worker)
}

/// Span covering the lifetime of the block writer thread.
pub fn writer_span() -> Span {
    info_span!("block_writer")
}

/// Span covering parsing and finalisation of a single block.
pub fn block_span(block: u64, bytes: usize, terminal: bool) -> Span {
    info_span!("block", block = block, bytes = bytes, terminal = terminal)
}
