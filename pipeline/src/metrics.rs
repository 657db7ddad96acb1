//! Prometheus metrics for the tracer pipeline.
//!
//! [`PipelineMetrics`] owns a dedicated [`Registry`]. Workers publish the
//! deltas of their parser and store counters; the reader and writer count
//! blocks and bytes. There is no HTTP endpoint: [`PipelineMetrics::render`]
//! produces the text exposition format for the binary to print.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};
use tracer_parser::ParserStats;
use tracer_store::StoreStats;

/// Central collection of all pipeline metrics.
pub struct PipelineMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    pub lines_accepted: IntCounter,
    /// Malformed lines skipped by resynchronisation.
    pub lines_dropped: IntCounter,
    /// Requests written to the output.
    pub requests_completed: IntCounter,
    /// Requests dropped for lack of a root call.
    pub requests_skipped: IntCounter,
    /// Requests stitched together across a block boundary.
    pub requests_merged: IntCounter,
    /// Spans defined by more than one line.
    pub span_conflicts: IntCounter,
    pub blocks_read: IntCounter,
    pub bytes_read: IntCounter,
    pub blocks_written: IntCounter,
    pub bytes_written: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Largest number of children seen under one span.
    pub max_fan_out: IntGauge,
    /// Size of the most recently published forward set.
    pub requests_in_transit: IntGauge,
}

impl PipelineMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| {
            register_int_counter_with_registry!(Opts::new(name, help), registry)
                .unwrap_or_else(|e| panic!("failed to register {name}: {e}"))
        };

        let lines_accepted = counter("tracer_lines_accepted_total", "Log lines parsed and recorded");
        let lines_dropped = counter("tracer_lines_dropped_total", "Malformed log lines skipped");
        let requests_completed = counter("tracer_requests_completed_total", "Requests written as JSON");
        let requests_skipped = counter(
            "tracer_requests_skipped_total",
            "Requests dropped without a root call",
        );
        let requests_merged = counter(
            "tracer_requests_merged_total",
            "Requests merged across block boundaries",
        );
        let span_conflicts = counter("tracer_span_conflicts_total", "Spans defined more than once");
        let blocks_read = counter("tracer_blocks_read_total", "Input blocks read");
        let bytes_read = counter("tracer_bytes_read_total", "Input bytes read");
        let blocks_written = counter("tracer_blocks_written_total", "Output buffers written");
        let bytes_written = counter("tracer_bytes_written_total", "Output bytes written");

        let max_fan_out = register_int_gauge_with_registry!(
            Opts::new("tracer_max_fan_out", "Largest number of children under one span"),
            registry
        )
        .expect("failed to register max_fan_out gauge");

        let requests_in_transit = register_int_gauge_with_registry!(
            Opts::new(
                "tracer_requests_in_transit",
                "Open requests handed to the next block"
            ),
            registry
        )
        .expect("failed to register requests_in_transit gauge");

        Self {
            registry,
            lines_accepted,
            lines_dropped,
            requests_completed,
            requests_skipped,
            requests_merged,
            span_conflicts,
            blocks_read,
            bytes_read,
            blocks_written,
            bytes_written,
            max_fan_out,
            requests_in_transit,
        }
    }

    /// Add one worker's counters accumulated since its last report.
    pub fn record_worker(&self, parser: ParserStats, store: StoreStats) {
        self.lines_accepted.inc_by(parser.lines_accepted);
        self.lines_dropped.inc_by(parser.lines_dropped);
        self.requests_completed.inc_by(store.requests_completed);
        self.requests_skipped.inc_by(store.requests_skipped);
        self.requests_merged.inc_by(store.requests_merged);
        self.span_conflicts.inc_by(store.span_conflicts);
        let fan_out = i64::try_from(store.max_fan_out).unwrap_or(i64::MAX);
        if fan_out > self.max_fan_out.get() {
            self.max_fan_out.set(fan_out);
        }
    }

    /// Encode every metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
