//! Block writer: drains filled output buffers into the output stream.

use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::block::WriterItem;
use crate::metrics::PipelineMetrics;
use crate::PipelineError;

pub struct BlockWriter<W> {
    output: W,
    filled: Receiver<WriterItem>,
    drained: Sender<Vec<u8>>,
    workers: usize,
    metrics: Arc<PipelineMetrics>,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(
        output: W,
        filled: Receiver<WriterItem>,
        drained: Sender<Vec<u8>>,
        workers: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            output,
            filled,
            drained,
            workers,
            metrics,
        }
    }

    /// Write buffers until every worker has signalled exit or all workers
    /// are gone, then flush the output.
    pub fn run(mut self) -> Result<(), PipelineError> {
        info!("block writer started");
        let mut exits = 0usize;
        let mut blocks = 0u64;
        let mut bytes = 0u64;

        while exits < self.workers {
            match self.filled.recv() {
                Ok(WriterItem::Buffer(mut buf)) => {
                    self.output.write_all(&buf)?;
                    blocks += 1;
                    bytes += buf.len() as u64;
                    self.metrics.blocks_written.inc();
                    self.metrics.bytes_written.inc_by(buf.len() as u64);
                    buf.clear();
                    // Workers that already exited no longer take buffers.
                    let _ = self.drained.send(buf);
                }
                Ok(WriterItem::Exit) => exits += 1,
                Err(_) => {
                    debug!(exits, "all workers gone");
                    break;
                }
            }
        }

        self.output.flush()?;
        info!(blocks, bytes, "block writer terminated");
        Ok(())
    }
}
