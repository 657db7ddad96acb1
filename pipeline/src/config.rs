//! Pipeline configuration with TOML file support.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracer_utils::LogFormat;

use crate::PipelineError;

/// Smallest accepted value for buffer sizes, line length and the
/// statistics interval.
pub const MIN_SETTING: usize = 100;

/// Largest number of years the date cache may span.
pub const MAX_CALENDAR_YEARS: u32 = 200;

/// Configuration for one trace-reconstruction run.
///
/// Can be loaded from a TOML file via [`TracerConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    /// Size of each input block buffer in bytes.
    #[serde(default = "default_buffer_bytes")]
    pub read_buffer_bytes: usize,

    /// Size of each output buffer in bytes. One rendered request must fit.
    #[serde(default = "default_buffer_bytes")]
    pub write_buffer_bytes: usize,

    /// Longest input line that may straddle two blocks.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// A request with no new line for this long is considered complete.
    #[serde(default = "default_expire_after_ms")]
    pub expire_after_ms: u64,

    /// Workers publish their statistics after this many accepted lines.
    #[serde(default = "default_flush_check_lines")]
    pub flush_check_lines: u64,

    /// Number of worker threads; 0 means one per CPU.
    #[serde(default)]
    pub worker_threads: usize,

    /// Cached calendar years before the current one.
    #[serde(default = "default_years_back")]
    pub calendar_years_back: u32,

    /// Cached calendar years after the current one.
    #[serde(default = "default_years_ahead")]
    pub calendar_years_ahead: u32,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_buffer_bytes() -> usize {
    8192
}

fn default_max_line_length() -> usize {
    120
}

fn default_expire_after_ms() -> u64 {
    3 * 60 * 1000
}

fn default_flush_check_lines() -> u64 {
    10_000
}

fn default_years_back() -> u32 {
    3
}

fn default_years_ahead() -> u32 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl TracerConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        toml::from_str(s).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, PipelineError> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Worker count with 0 resolved to the number of CPUs.
    pub fn resolved_workers(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_threads
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let sizes = [
            ("read_buffer_bytes", self.read_buffer_bytes),
            ("write_buffer_bytes", self.write_buffer_bytes),
            ("max_line_length", self.max_line_length),
            ("flush_check_lines", self.flush_check_lines as usize),
        ];
        for (name, value) in sizes {
            if value < MIN_SETTING {
                return Err(PipelineError::Config(format!(
                    "{name} is {value}, must be at least {MIN_SETTING}"
                )));
            }
        }
        if self.read_buffer_bytes <= self.max_line_length {
            return Err(PipelineError::Config(format!(
                "read_buffer_bytes ({}) must exceed max_line_length ({})",
                self.read_buffer_bytes, self.max_line_length
            )));
        }
        if self.write_buffer_bytes < self.max_line_length {
            return Err(PipelineError::Config(format!(
                "write_buffer_bytes ({}) must hold at least one line ({})",
                self.write_buffer_bytes, self.max_line_length
            )));
        }
        let years = self
            .calendar_years_back
            .saturating_add(self.calendar_years_ahead)
            .saturating_add(1);
        if years > MAX_CALENDAR_YEARS {
            return Err(PipelineError::Config(format!(
                "calendar window of {years} years exceeds {MAX_CALENDAR_YEARS}"
            )));
        }
        if self.expire_after_ms == 0 {
            return Err(PipelineError::Config("expire_after_ms must be positive".into()));
        }
        Ok(())
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: default_buffer_bytes(),
            write_buffer_bytes: default_buffer_bytes(),
            max_line_length: default_max_line_length(),
            expire_after_ms: default_expire_after_ms(),
            flush_check_lines: default_flush_check_lines(),
            worker_threads: 0,
            calendar_years_back: default_years_back(),
            calendar_years_ahead: default_years_ahead(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}
