//! Compute backend trait and remote job status types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Terminal and in-flight states a remote batch job can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    InProgress,
    Completed,
    Failed,
    Stopping,
    Stopped,
}

impl JobState {
    /// Whether the backend will not move this job any further.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Stopped)
    }
}

/// Backend-reported job descriptor, cached on the [`Job`] after each poll.
///
/// [`Job`]: https://docs.rs/dynaeval-pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub state: JobState,
    pub failure_reason: Option<String>,
}

impl RemoteJobStatus {
    /// True when the failure originated inside the model container, meaning
    /// the model itself is broken rather than this one dataset.
    pub fn is_algorithm_error(&self) -> bool {
        self.failure_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("AlgorithmError"))
    }
}

/// Specification for one batch-transform job submission.
#[derive(Debug, Clone)]
pub struct TransformSpec {
    pub job_name: String,
    /// Remote model/endpoint name serving the inference.
    pub model_name: String,
    /// Storage URI of the dataset file to run the model over.
    pub input_uri: String,
    /// Storage URI prefix where predictions are written.
    pub output_uri: String,
    pub content_type: String,
    pub instance_type: String,
    pub instance_count: i32,
}

/// The remote batch-inference backend, reduced to the four calls the
/// scheduler makes. Each call is a single synchronous RPC.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn create_job(&self, spec: &TransformSpec) -> Result<(), ComputeError>;

    async fn describe_job(&self, name: &str) -> Result<RemoteJobStatus, ComputeError>;

    async fn list_jobs(&self, name_contains: &str) -> Result<Vec<String>, ComputeError>;

    /// Best-effort stop; the job may still report a terminal status later.
    async fn stop_job(&self, name: &str) -> Result<(), ComputeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Stopped.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
        assert!(!JobState::Stopping.is_terminal());
    }

    #[test]
    fn algorithm_error_detection() {
        let status = RemoteJobStatus {
            state: JobState::Failed,
            failure_reason: Some("AlgorithmError: container exited with 137".to_string()),
        };
        assert!(status.is_algorithm_error());

        let status = RemoteJobStatus {
            state: JobState::Failed,
            failure_reason: Some("ClientError: bad input manifest".to_string()),
        };
        assert!(!status.is_algorithm_error());

        let status = RemoteJobStatus {
            state: JobState::Completed,
            failure_reason: None,
        };
        assert!(!status.is_algorithm_error());
    }
}
