//! tracer: reads span log lines and writes one JSON call tree per request.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracer_pipeline::{run_pipeline, PipelineError, PipelineMetrics, TracerConfig};
use tracer_store::StoreError;
use tracer_utils::{format_millis, init_logging, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "tracer", about = "Reconstruct request call trees from span log lines")]
struct Cli {
    /// Input log file. Reads standard input when omitted.
    #[arg(short, long, env = "TRACER_INPUT")]
    input: Option<PathBuf>,

    /// Output file for JSON lines. Writes standard output when omitted.
    #[arg(short, long, env = "TRACER_OUTPUT")]
    output: Option<PathBuf>,

    /// Size of each input block in bytes.
    #[arg(long, env = "TRACER_RBUF")]
    rbuf: Option<usize>,

    /// Size of each output buffer in bytes; one request must fit.
    #[arg(long, env = "TRACER_WBUF")]
    wbuf: Option<usize>,

    /// Longest accepted input line in bytes.
    #[arg(long, env = "TRACER_MAX_LINE")]
    max_line: Option<usize>,

    /// Minutes without a new line after which a request is written out.
    #[arg(long, env = "TRACER_EXPIRE_MINUTES")]
    expire_minutes: Option<u64>,

    /// Accepted lines between statistics reports of a worker.
    #[arg(long, env = "TRACER_FLUSH_CHECK")]
    flush_check: Option<u64>,

    /// Worker threads (0 = one per CPU).
    #[arg(long, env = "TRACER_WORKERS")]
    workers: Option<usize>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "TRACER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "TRACER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Path to a TOML configuration file. File settings are the base;
    /// flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics to stderr when done.
    #[arg(long)]
    print_metrics: bool,
}

impl Cli {
    /// Overlay the flags that were given onto `base`.
    fn apply(&self, base: TracerConfig) -> TracerConfig {
        TracerConfig {
            read_buffer_bytes: self.rbuf.unwrap_or(base.read_buffer_bytes),
            write_buffer_bytes: self.wbuf.unwrap_or(base.write_buffer_bytes),
            max_line_length: self.max_line.unwrap_or(base.max_line_length),
            expire_after_ms: self
                .expire_minutes
                .map(|m| m.saturating_mul(60_000))
                .unwrap_or(base.expire_after_ms),
            flush_check_lines: self.flush_check.unwrap_or(base.flush_check_lines),
            worker_threads: self.workers.unwrap_or(base.worker_threads),
            log_format: self.log_format.unwrap_or(base.log_format),
            log_level: self.log_level.clone().unwrap_or(base.log_level),
            ..base
        }
    }
}

fn open_input(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn Read + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("cannot open input {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    })
}

fn open_output(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("cannot create output {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => TracerConfig::from_toml_file(path)?,
        None => TracerConfig::default(),
    };
    let config = cli.apply(base);
    init_logging(config.log_format, &config.log_level);
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    tracing::info!(
        "Starting tracer (rbuf {}, wbuf {}, max line {}, expire {}, workers {})",
        config.read_buffer_bytes,
        config.write_buffer_bytes,
        config.max_line_length,
        format_millis(config.expire_after_ms),
        config.resolved_workers(),
    );

    let input = open_input(cli.input.as_ref())?;
    let output = open_output(cli.output.as_ref())?;
    let metrics = Arc::new(PipelineMetrics::new());

    let started = Instant::now();
    let result = run_pipeline(&config, input, output, Arc::clone(&metrics));
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if cli.print_metrics {
        eprint!("{}", metrics.render()?);
    }

    match result {
        Ok(()) => {
            tracing::info!(
                "tracer finished in {}: {} requests written, {} lines dropped",
                format_millis(elapsed),
                metrics.requests_completed.get(),
                metrics.lines_dropped.get(),
            );
            Ok(())
        }
        Err(PipelineError::Store(StoreError::RequestTooLarge { request, capacity })) => {
            anyhow::bail!(
                "request {request} does not fit into a {capacity}-byte write buffer; raise --wbuf"
            )
        }
        Err(e) => Err(e).context("pipeline failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_flags_keep_the_base() {
        let cli = Cli::try_parse_from(["tracer"]).unwrap();
        assert!(cli.input.is_none());
        assert!(!cli.print_metrics);
        assert_eq!(cli.apply(TracerConfig::default()), TracerConfig::default());
    }

    #[test]
    fn flags_override_file_settings() {
        let cli = Cli::try_parse_from([
            "tracer",
            "-i",
            "spans.log",
            "--wbuf",
            "65536",
            "--expire-minutes",
            "5",
            "--workers",
            "4",
            "--log-format",
            "json",
        ])
        .unwrap();
        let base = TracerConfig::from_toml_str("read_buffer_bytes = 4096\nwrite_buffer_bytes = 2048").unwrap();
        let config = cli.apply(base);

        assert_eq!(cli.input, Some(PathBuf::from("spans.log")));
        assert_eq!(config.read_buffer_bytes, 4096);
        assert_eq!(config.write_buffer_bytes, 65536);
        assert_eq!(config.expire_after_ms, 300_000);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.max_line_length, 120);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(Cli::try_parse_from(["tracer", "--rbuf", "lots"]).is_err());
        assert!(Cli::try_parse_from(["tracer", "--log-format", "xml"]).is_err());
    }
}
