//! Block pipeline for trace reconstruction.
//!
//! One reader thread cuts the input into newline-aligned blocks, a pool of
//! workers parses them and stitches requests across block boundaries
//! through the [`TransitBus`], and one writer thread drains the rendered
//! JSON into the output. Buffers circulate between the threads through
//! bounded pools, so memory use is fixed by the configuration.

pub mod block;
pub mod bus;
pub mod config;
pub mod error;
pub mod metrics;
pub mod reader;
pub mod tracing_spans;
pub mod worker;
pub mod writer;

pub use bus::TransitBus;
pub use config::TracerConfig;
pub use error::{PipelineError, TransitError};
pub use metrics::PipelineMetrics;

use std::io::{Read, Write};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracer_dictionary::ServiceDictionary;
use tracer_types::Calendar;
use tracing::{debug, info};

use crate::reader::BlockReader;
use crate::worker::{Worker, WorkerLinks};
use crate::writer::BlockWriter;

/// A bounded channel preloaded with `count` empty buffers.
fn buffer_pool(count: usize, capacity: usize) -> (Sender<Vec<u8>>, Receiver<Vec<u8>>) {
    let (tx, rx) = bounded(count);
    for _ in 0..count {
        // Never blocks: the channel holds exactly `count` items.
        let _ = tx.send(Vec::with_capacity(capacity));
    }
    (tx, rx)
}

/// Reconstruct every request in `input` and write one JSON line per
/// request to `output`.
///
/// Returns the first error that caused the pipeline to stop. Errors that
/// merely report another thread's failure are only returned when nothing
/// better is known.
pub fn run_pipeline<R, W>(
    config: &TracerConfig,
    input: R,
    output: W,
    metrics: Arc<PipelineMetrics>,
) -> Result<(), PipelineError>
where
    R: Read + Send,
    W: Write + Send,
{
    config.validate()?;
    let workers = config.resolved_workers();
    let calendar = Arc::new(Calendar::around_now(
        config.calendar_years_back,
        config.calendar_years_ahead,
    )?);
    let years = calendar.years();
    info!(
        workers,
        read_buffer = config.read_buffer_bytes,
        write_buffer = config.write_buffer_bytes,
        first_year = years.start,
        last_year = years.end - 1,
        "starting pipeline"
    );

    let dict = ServiceDictionary::new();
    let bus = Arc::new(TransitBus::new());

    let (free_input_tx, free_input_rx) = buffer_pool(workers + 2, config.read_buffer_bytes);
    let (drained_tx, drained_rx) = buffer_pool(workers * 2, config.write_buffer_bytes);
    let (blocks_tx, blocks_rx) = bounded(workers);
    let (filled_tx, filled_rx) = bounded(workers * 3);

    let links = WorkerLinks {
        blocks: blocks_rx,
        free_input: free_input_tx,
        filled: filled_tx,
        drained: drained_rx,
        bus,
        metrics: Arc::clone(&metrics),
    };

    thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers + 2);

        let reader = BlockReader::new(
            input,
            free_input_rx,
            blocks_tx,
            config.read_buffer_bytes,
            config.max_line_length,
            workers,
            Arc::clone(&metrics),
        );
        let name = "block-reader".to_string();
        let handle = thread::Builder::new().name(name.clone()).spawn_scoped(s, move || {
            let span = tracing_spans::reader_span();
            let _enter = span.enter();
            reader.run()
        })?;
        handles.push((name, handle));

        for id in 0..workers {
            let worker = Worker::new(id, links.clone(), Arc::clone(&calendar), dict.fork(), config);
            let name = format!("worker-{id}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn_scoped(s, move || worker.run())?;
            handles.push((name, handle));
        }

        let writer = BlockWriter::new(output, filled_rx, drained_tx, workers, Arc::clone(&metrics));
        let name = "block-writer".to_string();
        let handle = thread::Builder::new().name(name.clone()).spawn_scoped(s, move || {
            let span = tracing_spans::writer_span();
            let _enter = span.enter();
            writer.run()
        })?;
        handles.push((name, handle));

        // Only the threads may hold channel ends from here on, so that a
        // dying thread disconnects its peers.
        drop(links);

        let mut first: Option<PipelineError> = None;
        for (name, handle) in handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(PipelineError::ThreadPanicked(name.clone())));
            if let Err(e) = result {
                debug!(thread = %name, error = %e, "thread failed");
                first = match first {
                    Some(prev) if !prev.is_secondary() || e.is_secondary() => Some(prev),
                    _ => Some(e),
                };
            }
        }
        match first {
            Some(e) => Err(e),
            None => {
                info!("pipeline finished");
                Ok(())
            }
        }
    })
}
