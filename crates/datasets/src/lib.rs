//! Dataset strategies for the evaluation pipeline.
//!
//! Each registered dataset knows how to submit a batch-transform job over
//! its input file, how to read back and align the resulting predictions,
//! and which metric turns aligned pairs into a score. The pipeline only
//! sees the [`TaskDataset`] trait and the [`DatasetRegistry`].

pub mod error;
pub mod metrics;
pub mod parse;
pub mod task;
pub mod tasks;

pub use error::DatasetError;
pub use task::{
    DatasetFiles, DatasetRegistry, JobArtifacts, MetricBundle, TaskDataset, PERTURB_PREFIXES,
};
pub use tasks::{HateSpeechDataset, MtDataset, NliDataset, QaDataset, SentimentDataset};
