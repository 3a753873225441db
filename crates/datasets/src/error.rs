use thiserror::Error;

use dynaeval_backend::error::StoreError;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("alignment error: {0}")]
    Alignment(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("no predictions found under {0}")]
    NoPredictions(String),
}
