//! Block reader: cuts the input stream into newline-aligned blocks.

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::block::{Block, WorkItem};
use crate::metrics::PipelineMetrics;
use crate::PipelineError;

pub struct BlockReader<R> {
    input: R,
    free: Receiver<Vec<u8>>,
    blocks: Sender<WorkItem>,
    block_bytes: usize,
    max_line_length: usize,
    workers: usize,
    metrics: Arc<PipelineMetrics>,
    bytes_read: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(
        input: R,
        free: Receiver<Vec<u8>>,
        blocks: Sender<WorkItem>,
        block_bytes: usize,
        max_line_length: usize,
        workers: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            input,
            free,
            blocks,
            block_bytes,
            max_line_length,
            workers,
            metrics,
            bytes_read: 0,
        }
    }

    /// Read until end of input, then send the terminal block and one exit
    /// per worker.
    pub fn run(mut self) -> Result<(), PipelineError> {
        info!("block reader started");
        let mut tail: Vec<u8> = Vec::with_capacity(self.max_line_length);
        let mut seq = 0u64;

        loop {
            let mut buf = self
                .free
                .recv()
                .map_err(|_| PipelineError::Disconnected("input buffer pool"))?;
            buf.clear();
            buf.append(&mut tail);

            let eof = self.fill(&mut buf)?;
            if eof {
                // Complete an unterminated last line.
                if !buf.is_empty() {
                    buf.push(b'\n');
                }
                debug!(block = seq, bytes = buf.len(), "end of input");
                self.send(Block {
                    seq,
                    data: buf,
                    terminal: true,
                })?;
                break;
            }

            let Some(last) = buf.iter().rposition(|&b| b == b'\n') else {
                return Err(PipelineError::LineTooLong {
                    block: seq,
                    limit: self.max_line_length,
                });
            };
            if buf.len() - (last + 1) > self.max_line_length {
                return Err(PipelineError::LineTooLong {
                    block: seq,
                    limit: self.max_line_length,
                });
            }
            tail.extend_from_slice(&buf[last + 1..]);
            buf.truncate(last + 1);

            self.send(Block {
                seq,
                data: buf,
                terminal: false,
            })?;
            seq += 1;
        }

        for _ in 0..self.workers {
            self.blocks
                .send(WorkItem::Exit)
                .map_err(|_| PipelineError::Disconnected("worker input"))?;
        }
        info!(blocks = seq + 1, bytes = self.bytes_read, "block reader terminated");
        Ok(())
    }

    /// Read into the free space of `buf` until it holds a newline or is
    /// full. Returns whether the input is exhausted.
    fn fill(&mut self, buf: &mut Vec<u8>) -> Result<bool, PipelineError> {
        loop {
            let filled = buf.len();
            if filled >= self.block_bytes {
                return Ok(false);
            }
            buf.resize(self.block_bytes, 0);
            let read = match self.input.read(&mut buf[filled..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    buf.truncate(filled);
                    continue;
                }
                Err(e) => {
                    buf.truncate(filled);
                    return Err(e.into());
                }
            };
            buf.truncate(filled + read);
            if read == 0 {
                return Ok(true);
            }
            self.bytes_read += read as u64;
            self.metrics.bytes_read.inc_by(read as u64);
            if buf[filled..].contains(&b'\n') {
                return Ok(false);
            }
        }
    }

    fn send(&self, block: Block) -> Result<(), PipelineError> {
        self.metrics.blocks_read.inc();
        self.blocks
            .send(WorkItem::Block(block))
            .map_err(|_| PipelineError::Disconnected("worker input"))
    }
}
