//! Scripted fakes for the external-backend traits, shared by the
//! scheduler/computer/requester tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dynaeval_backend::compute::{ComputeBackend, JobState, RemoteJobStatus, TransformSpec};
use dynaeval_backend::error::{ComputeError, MonitorError};
use dynaeval_backend::monitor::{MetricWindow, MonitorBackend};
use dynaeval_core::entities::{
    DeploymentStatus, EvaluationStatus, ModelId, ModelRecord, TaskId,
};
use dynaeval_datasets::error::DatasetError;
use dynaeval_datasets::task::{DatasetRegistry, JobArtifacts, MetricBundle, TaskDataset};

pub fn model_record(id: ModelId, task_id: TaskId) -> ModelRecord {
    ModelRecord {
        id,
        task_id,
        name: format!("model-{id}"),
        endpoint_name: format!("ts{task_id}-model-{id}"),
        deployment_status: DeploymentStatus::Deployed,
        evaluation_status: EvaluationStatus::Evaluating,
    }
}

pub fn registry_with(datasets: Vec<MockDataset>) -> Arc<DatasetRegistry> {
    let mut registry = DatasetRegistry::new();
    for dataset in datasets {
        registry.register(Arc::new(dataset));
    }
    Arc::new(registry)
}

// ── Compute backend ───────────────────────────────────────────

#[derive(Default)]
pub struct MockComputeBackend {
    create_script: Mutex<VecDeque<Result<(), ComputeError>>>,
    created: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, RemoteJobStatus>>,
    stopped: Mutex<Vec<String>>,
    describe_fails: AtomicBool,
}

impl MockComputeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for the next `create_job` call; unscripted calls
    /// succeed.
    pub fn script_create(&self, result: Result<(), ComputeError>) {
        self.create_script.lock().unwrap().push_back(result);
    }

    /// Names of all successfully created jobs, in submission order.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_status(&self, name: &str, status: RemoteJobStatus) {
        self.statuses.lock().unwrap().insert(name.to_string(), status);
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn fail_describe(&self) {
        self.describe_fails.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ComputeBackend for MockComputeBackend {
    async fn create_job(&self, spec: &TransformSpec) -> Result<(), ComputeError> {
        if let Some(result) = self.create_script.lock().unwrap().pop_front() {
            result?;
        }
        self.created.lock().unwrap().push(spec.job_name.clone());
        Ok(())
    }

    async fn describe_job(&self, name: &str) -> Result<RemoteJobStatus, ComputeError> {
        if self.describe_fails.load(Ordering::SeqCst) {
            return Err(ComputeError::Backend("describe outage".into()));
        }
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or(RemoteJobStatus {
                state: JobState::InProgress,
                failure_reason: None,
            }))
    }

    async fn list_jobs(&self, name_contains: &str) -> Result<Vec<String>, ComputeError> {
        Ok(self
            .created
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.contains(name_contains))
            .cloned()
            .collect())
    }

    async fn stop_job(&self, name: &str) -> Result<(), ComputeError> {
        self.stopped.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

// ── Monitor backend ───────────────────────────────────────────

/// Monitor that reports nothing ran anywhere.
pub struct NullMonitor;

#[async_trait]
impl MonitorBackend for NullMonitor {
    async fn list_log_streams(&self, _prefix: &str) -> Result<Vec<String>, MonitorError> {
        Ok(Vec::new())
    }

    async fn metric_datapoints(
        &self,
        _metric_name: &str,
        _host: &str,
        _window: &MetricWindow,
    ) -> Result<Vec<f64>, MonitorError> {
        Ok(Vec::new())
    }
}

/// Monitor with one fixed host and the same datapoints for every metric.
pub struct MockMonitor {
    pub hosts: Vec<String>,
    pub points: Vec<f64>,
}

#[async_trait]
impl MonitorBackend for MockMonitor {
    async fn list_log_streams(&self, _prefix: &str) -> Result<Vec<String>, MonitorError> {
        Ok(self.hosts.clone())
    }

    async fn metric_datapoints(
        &self,
        _metric_name: &str,
        _host: &str,
        _window: &MetricWindow,
    ) -> Result<Vec<f64>, MonitorError> {
        Ok(self.points.clone())
    }
}

// ── Dataset strategy ──────────────────────────────────────────

enum Behavior {
    /// Fetch yields these pairs; score is percent of exact matches.
    Pairs(Vec<(String, String)>),
    FetchFails(String),
    ScoreFails(String),
}

pub struct MockDataset {
    name: String,
    behavior: Behavior,
    score_delay: Option<Duration>,
}

impl MockDataset {
    /// All predictions correct: scores 100.0.
    pub fn passing(name: &str) -> Self {
        Self::with_pairs(
            name,
            vec![("a".into(), "a".into()), ("b".into(), "b".into())],
        )
    }

    pub fn with_pairs(name: &str, pairs: Vec<(String, String)>) -> Self {
        Self {
            name: name.to_string(),
            behavior: Behavior::Pairs(pairs),
            score_delay: None,
        }
    }

    pub fn fetch_fails(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: Behavior::FetchFails(message.to_string()),
            score_delay: None,
        }
    }

    pub fn score_fails(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            behavior: Behavior::ScoreFails(message.to_string()),
            score_delay: None,
        }
    }

    /// Scoring stalls for `delay`, keeping the job in `computing`.
    pub fn slow(name: &str, delay: Duration) -> Self {
        Self {
            score_delay: Some(delay),
            ..Self::passing(name)
        }
    }
}

#[async_trait]
impl TaskDataset for MockDataset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn available(&self, _perturb_prefix: Option<&str>) -> bool {
        true
    }

    async fn run_batch_transform(
        &self,
        backend: &dyn ComputeBackend,
        endpoint_name: &str,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<(), ComputeError> {
        let spec = TransformSpec {
            job_name: job_name.to_string(),
            model_name: endpoint_name.to_string(),
            input_uri: format!(
                "mock://datasets/{}",
                match perturb_prefix {
                    Some(prefix) => format!("{prefix}-{}", self.name),
                    None => self.name.clone(),
                }
            ),
            output_uri: format!("mock://predictions/{job_name}"),
            content_type: "application/json".to_string(),
            instance_type: "ml.m5.xlarge".to_string(),
            instance_count: 1,
        };
        backend.create_job(&spec).await
    }

    async fn fetch_artifacts(
        &self,
        _job_name: &str,
        _perturb_prefix: Option<&str>,
    ) -> Result<JobArtifacts, DatasetError> {
        match &self.behavior {
            Behavior::Pairs(pairs) => Ok(JobArtifacts {
                pairs: pairs.clone(),
            }),
            Behavior::FetchFails(message) => Err(DatasetError::Parse(message.clone())),
            Behavior::ScoreFails(_) => Ok(JobArtifacts { pairs: Vec::new() }),
        }
    }

    fn score(&self, artifacts: &JobArtifacts) -> Result<MetricBundle, DatasetError> {
        if let Some(delay) = self.score_delay {
            std::thread::sleep(delay);
        }
        if let Behavior::ScoreFails(message) = &self.behavior {
            return Err(DatasetError::Parse(message.clone()));
        }
        let total = artifacts.pairs.len().max(1) as f64;
        let correct = artifacts
            .pairs
            .iter()
            .filter(|(target, prediction)| target == prediction)
            .count() as f64;
        let acc = 100.0 * correct / total;
        let mut metadata = serde_json::Map::new();
        metadata.insert("accuracy".to_string(), serde_json::json!(acc));
        Ok(MetricBundle::percent(acc, metadata))
    }
}
