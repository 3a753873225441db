//! Natural language inference datasets (3-way entailment labels).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use dynaeval_backend::compute::ComputeBackend;
use dynaeval_backend::error::ComputeError;
use dynaeval_backend::store::FileStore;

use crate::error::DatasetError;
use crate::metrics::accuracy;
use crate::task::{DatasetFiles, JobArtifacts, MetricBundle, TaskDataset};

pub struct NliDataset {
    files: DatasetFiles,
}

impl NliDataset {
    pub fn new(name: impl Into<String>, store: Arc<FileStore>, base_uri: impl Into<String>) -> Self {
        Self {
            files: DatasetFiles::new(name, store, base_uri, "label"),
        }
    }
}

#[async_trait]
impl TaskDataset for NliDataset {
    fn name(&self) -> &str {
        self.files.name()
    }

    async fn available(&self, perturb_prefix: Option<&str>) -> bool {
        self.files.available(perturb_prefix).await
    }

    async fn run_batch_transform(
        &self,
        backend: &dyn ComputeBackend,
        endpoint_name: &str,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<(), ComputeError> {
        self.files
            .run_batch_transform(backend, endpoint_name, job_name, perturb_prefix)
            .await
    }

    async fn fetch_artifacts(
        &self,
        job_name: &str,
        perturb_prefix: Option<&str>,
    ) -> Result<JobArtifacts, DatasetError> {
        self.files.fetch_artifacts(job_name, perturb_prefix).await
    }

    fn score(&self, artifacts: &JobArtifacts) -> Result<MetricBundle, DatasetError> {
        let acc = accuracy(&artifacts.pairs);
        let mut metadata = Map::new();
        metadata.insert("accuracy".to_string(), json!(acc));
        metadata.insert("examples".to_string(), json!(artifacts.pairs.len()));
        Ok(MetricBundle::percent(acc, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> NliDataset {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::local(tmp.path()).unwrap());
        NliDataset::new("mnli-dev", store, "s3://bucket/eval")
    }

    #[test]
    fn scores_accuracy() {
        let artifacts = JobArtifacts {
            pairs: vec![
                ("entailment".into(), "entailment".into()),
                ("neutral".into(), "contradiction".into()),
            ],
        };
        let bundle = dataset().score(&artifacts).unwrap();
        assert_eq!(bundle.perf, 50.0);
        assert_eq!(bundle.pretty_perf, "50.0%");
        assert_eq!(bundle.metadata["accuracy"], 50.0);
        assert_eq!(bundle.metadata["examples"], 2);
    }
}
