//! Backend error types.

use thiserror::Error;

/// Errors from the batch-inference compute backend.
///
/// The first three variants are the transient/idempotent cases the
/// scheduler switches on when deciding whether a failed submission should
/// be retried; everything else lands in `Backend`.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("resource limit exceeded")]
    ResourceLimitExceeded,

    #[error("resource already in use")]
    ResourceInUse,

    #[error("request throttled")]
    Throttled,

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("provider error: {0}")]
    Provider(String),
}
