//! External-collaborator boundary for the evaluation pipeline.
//!
//! Every remote system the pipeline talks to — the batch-inference compute
//! backend, the metrics/monitoring backend, object storage, and the inbound
//! request queue — is reached through a trait defined here, with AWS
//! implementations alongside. The pipeline crates only ever see the traits.

pub mod cloudwatch;
pub mod compute;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod request;
pub mod sagemaker;
pub mod sqs;
pub mod store;

pub use cloudwatch::CloudWatchMonitor;
pub use compute::{ComputeBackend, JobState, RemoteJobStatus, TransformSpec};
pub use error::{ComputeError, MonitorError, QueueError, StoreError};
pub use monitor::{MetricWindow, MonitorBackend};
pub use queue::{QueueMessage, RequestSource};
pub use request::{parse_request, DatasetSelector, EvalRequest, ModelSelector};
pub use sagemaker::SageMakerBackend;
pub use sqs::SqsRequestSource;
pub use store::FileStore;
