//! Shared utilities for the tracer.

pub mod logging;
pub mod time;

pub use logging::{init_logging, LogFormat};
pub use time::format_millis;
