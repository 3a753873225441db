use thiserror::Error;

use dynaeval_backend::error::{ComputeError, MonitorError, StoreError};
use dynaeval_core::error::CoreError;
use dynaeval_datasets::error::DatasetError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("core: {0}")]
    Core(#[from] CoreError),

    #[error("compute backend: {0}")]
    Compute(#[from] ComputeError),

    #[error("monitor backend: {0}")]
    Monitor(#[from] MonitorError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("dataset: {0}")]
    Dataset(#[from] DatasetError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("worker pool: {0}")]
    Pool(String),
}
