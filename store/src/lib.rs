//! Per-worker request store.
//!
//! Lines become [`Span`]s grouped by [`Request`]; a request split across
//! blocks is stitched back together with [`Request::merge`]; finished
//! requests are rendered as JSON lines into fixed-size [`OutputBuffer`]s.

pub mod error;
pub mod json;
pub mod repo;
pub mod request;
pub mod span;

pub use error::StoreError;
pub use json::{JsonError, JsonWriter, OutputBuffer, WriteOutcome};
pub use repo::{BlockWindow, OutputSink, RequestStore, StoreStats, TransitMap};
pub use request::{LineOutcome, MergeOutcome, Request};
pub use span::{ChildRef, Span};
