use thiserror::Error;
use tracer_store::StoreError;
use tracer_types::TimestampError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("block {block} has a line longer than {limit} bytes")]
    LineTooLong { block: u64, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("transit error: {0}")]
    Transit(#[from] TransitError),

    #[error("calendar error: {0}")]
    Calendar(#[from] TimestampError),

    #[error("{0} channel disconnected")]
    Disconnected(&'static str),

    #[error("thread {0} panicked")]
    ThreadPanicked(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl PipelineError {
    /// Errors that only report another thread's failure.
    pub fn is_secondary(&self) -> bool {
        matches!(
            self,
            Self::Transit(TransitError::Poisoned) | Self::Disconnected(_) | Self::Store(StoreError::OutputClosed)
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitError {
    #[error("transit slot {0} was assigned twice")]
    AlreadyAssigned(u64),

    #[error("transit slot {0} already has a waiter")]
    AlreadyAwaited(u64),

    #[error("transit slot {0} was already taken")]
    AlreadyTaken(u64),

    #[error("transit bus was poisoned by a failed worker")]
    Poisoned,
}
