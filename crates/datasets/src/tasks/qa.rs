//! Extractive question-answering datasets (SQuAD-style span answers).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use dynaeval_backend::compute::ComputeBackend;
use dynaeval_backend::error::ComputeError;
use dynaeval_backend::store::FileStore;

use crate::error::DatasetError;
use crate::metrics::{exact_match, squad_f1};
use crate::task::{DatasetFiles, JobArtifacts, MetricBundle, TaskDataset};

pub struct QaDataset {
    files: DatasetFiles,
}

impl QaDataset {
    pub fn new(name: impl Into<String>, store: Arc<FileStore>, base_uri: impl Into<String>) -> Self {
        Self {
            files: DatasetFiles::new(name, store, base_uri, "answer"),
        }
    }
}

#[async_trait]
impl TaskDataset for QaDataset {
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

    /// F1 is the headline number; exact match rides along in the metadata.
    fn score(&self, artifacts: &JobArtifacts) -> Result<MetricBundle, DatasetError> {
        let f1 = squad_f1(&artifacts.pairs);
        let em = exact_match(&artifacts.pairs);
        let mut metadata = Map::new();
        metadata.insert("f1".to_string(), json!(f1));
        metadata.insert("exact_match".to_string(), json!(em));
        metadata.insert("examples".to_string(), json!(artifacts.pairs.len()));
        Ok(MetricBundle::percent(f1, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f1_is_headline_em_in_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::local(tmp.path()).unwrap());
        let dataset = QaDataset::new("squad-dev", store, "s3://bucket/eval");

        let artifacts = JobArtifacts {
            pairs: vec![
                ("the Eiffel Tower".into(), "Eiffel Tower".into()),
                ("Paris".into(), "London".into()),
            ],
        };
        let bundle = dataset.score(&artifacts).unwrap();
        assert_eq!(bundle.perf, 50.0);
        assert_eq!(bundle.metadata["exact_match"], 50.0);
    }
}
