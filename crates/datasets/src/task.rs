//! The dataset strategy trait, shared file plumbing, and the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use dynaeval_backend::compute::{ComputeBackend, TransformSpec};
use dynaeval_backend::error::ComputeError;
use dynaeval_backend::store::FileStore;

use crate::error::DatasetError;
use crate::parse::{align, parse_label_line, parse_prediction_line, LabeledExample, Prediction};

/// Perturbation variants the registry understands as name prefixes.
pub const PERTURB_PREFIXES: &[&str] = &["fairness", "robustness"];

const DEFAULT_INSTANCE_TYPE: &str = "ml.m5.xlarge";
const DEFAULT_INSTANCE_COUNT: i32 = 1;
const CONTENT_TYPE: &str = "application/json";

/// Aligned (target, prediction) pairs for one finished job.
#[derive(Debug, Clone)]
pub struct JobArtifacts {
    pub pairs: Vec<(String, String)>,
}

/// Output of a dataset's scoring function.
#[derive(Debug, Clone)]
pub struct MetricBundle {
    pub perf: f64,
    pub perf_std: Option<f64>,
    pub pretty_perf: String,
    /// Metric breakdown merged into the Score row's metadata.
    pub metadata: Map<String, Value>,
}

impl MetricBundle {
    /// Bundle with `perf` as a percentage and the given breakdown.
    pub fn percent(perf: f64, metadata: Map<String, Value>) -> Self {
        Self {
            perf,
            perf_std: None,
            pretty_perf: format!("{perf:.1}%"),
            metadata,
        }
    }
}

/// One registered evaluation dataset: the strategy object each job
/// delegates to for submission, artifact retrieval, and scoring.
///
/// `score` is deliberately synchronous and self-contained so the computer
/// can run it on a worker pool without touching storage or the queues.
#[async_trait]
pub trait TaskDataset: Send + Sync {
    /// Base dataset name (no perturbation prefix).
    fn name(&self) -> &str;

    /// Whether the (possibly perturbed) input file exists in storage.
    async fn available(&self, perturb_prefix: Option<&str>) -> bool;

    /// Submit a batch-transform job over this dataset's input file.
    async fn run_batch_transform(
        &self,
        backend: &dyn ComputeBackend,
        endpoint_name: &str,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<(), ComputeError>;

    /// Download and align the job's predictions with the dataset's labels.
    async fn fetch_artifacts(
        &self,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<JobArtifacts, DatasetError>;

    /// Turn aligned pairs into metrics. Pure CPU, pool-safe.
    fn score(&self, artifacts: &JobArtifacts) -> Result<MetricBundle, DatasetError>;
}

// ── Shared file plumbing ──────────────────────────────────────

/// Storage-layout helper shared by all concrete datasets: where the input
/// file lives, where a job's predictions land, and how to read both back.
pub struct DatasetFiles {
    name: String,
    store: Arc<FileStore>,
    /// URI base the remote backend reads from / writes to
    /// (e.g. `s3://bucket/prefix`).
    base_uri: String,
    label_field: &'static str,
}

impl DatasetFiles {
    pub fn new(
        name: impl Into<String>,
        store: Arc<FileStore>,
        base_uri: impl Into<String>,
        label_field: &'static str,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            base_uri: base_uri.into().trim_end_matches('/').to_string(),
            label_field,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key of the (possibly perturbed) dataset file.
    pub fn input_key(&self, perturb_prefix: Option<&str>) -> String {
        match perturb_prefix {
            Some(prefix) => format!("datasets/{}-{}.jsonl", prefix, self.name),
            None => format!("datasets/{}.jsonl", self.name),
        }
    }

    /// Key prefix a job's prediction files are written under.
    pub fn output_key(&self, job_name: &str) -> String {
        format!("predictions/{job_name}")
    }

    pub fn input_uri(&self, perturb_prefix: Option<&str>) -> String {
        format!("{}/{}", self.base_uri, self.input_key(perturb_prefix))
    }

    pub fn output_uri(&self, job_name: &str) -> String {
        format!("{}/{}", self.base_uri, self.output_key(job_name))
    }

    pub async fn available(&self, perturb_prefix: Option<&str>) -> bool {
        self.store
            .exists(&self.input_key(perturb_prefix))
            .await
            .unwrap_or(false)
    }

    /// Build and submit the transform job spec.
    pub async fn run_batch_transform(
        &self,
        backend: &dyn ComputeBackend,
        endpoint_name: &str,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<(), ComputeError> {
        let spec = TransformSpec {
            job_name: job_name.to_string(),
            model_name: endpoint_name.to_string(),
            input_uri: self.input_uri(perturb_prefix),
            output_uri: self.output_uri(job_name),
            content_type: CONTENT_TYPE.to_string(),
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            instance_count: DEFAULT_INSTANCE_COUNT,
        };
        debug!(job = job_name, input = %spec.input_uri, "submitting batch transform");
        backend.create_job(&spec).await
    }

    /// Read the dataset's labels. Labels are unchanged by perturbation, so
    /// perturbed jobs are still scored against the baseline targets.
    pub async fn read_labels(
        &self,
        perturb_prefix: Option<&str>,
    ) -> Result<Vec<LabeledExample>, DatasetError> {
        let lines = self.store.get_lines(&self.input_key(perturb_prefix)).await?;
        lines
            .iter()
            .map(|line| parse_label_line(line, self.label_field))
            .collect()
    }

    /// Read every prediction part file a job produced.
    pub async fn read_predictions(&self, job_name: &str) -> Result<Vec<Prediction>, DatasetError> {
        let prefix = self.output_key(job_name);
        let keys = self.store.list(&prefix).await?;
        if keys.is_empty() {
            return Err(DatasetError::NoPredictions(prefix));
        }

        let mut predictions = Vec::new();
        for key in keys {
            for line in self.store.get_lines(&key).await? {
                predictions.push(parse_prediction_line(&line)?);
            }
        }
        Ok(predictions)
    }

    pub async fn fetch_artifacts(
        &self,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<JobArtifacts, DatasetError> {
        let examples = self.read_labels(perturb_prefix).await?;
        let predictions = self.read_predictions(job_name).await?;
        let pairs = align(&examples, &predictions)?;
        Ok(JobArtifacts { pairs })
    }
}

// ── Registry ──────────────────────────────────────────────────

/// Maps dataset names to their strategy objects and resolves perturbation
/// prefixes out of job dataset names.
#[derive(Default)]
pub struct DatasetRegistry {
    map: HashMap<String, Arc<dyn TaskDataset>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dataset: Arc<dyn TaskDataset>) {
        self.map.insert(dataset.name().to_string(), dataset);
    }

    /// Look up a dataset by its base name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskDataset>> {
        self.map.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Split a possibly prefixed dataset name into (perturb prefix, base
    /// name). `"fairness-mnli-dev"` resolves to `(Some("fairness"),
    /// "mnli-dev")`; an unprefixed name passes through unchanged.
    pub fn resolve(name: &str) -> (Option<&str>, &str) {
        for prefix in PERTURB_PREFIXES {
            if let Some(base) = name.strip_prefix(&format!("{prefix}-")) {
                return (Some(prefix), base);
            }
        }
        (None, name)
    }
}
