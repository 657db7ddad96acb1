use thiserror::Error;
use tracer_types::{RequestId, ServiceId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request {request} does not fit into an empty {capacity}-byte write buffer")]
    RequestTooLarge { request: RequestId, capacity: usize },

    #[error("service id {0} was never interned")]
    UnknownService(ServiceId),

    #[error("output sink is closed")]
    OutputClosed,
}
