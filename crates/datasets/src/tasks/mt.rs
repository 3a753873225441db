//! Machine translation datasets (BLEU against a single reference).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};

use dynaeval_backend::compute::ComputeBackend;
use dynaeval_backend::error::ComputeError;
use dynaeval_backend::store::FileStore;

use crate::error::DatasetError;
use crate::metrics::corpus_bleu;
use crate::task::{DatasetFiles, JobArtifacts, MetricBundle, TaskDataset};

pub struct MtDataset {
    files: DatasetFiles,
}

impl MtDataset {
    pub fn new(name: impl Into<String>, store: Arc<FileStore>, base_uri: impl Into<String>) -> Self {
        Self {
            files: DatasetFiles::new(name, store, base_uri, "translation"),
        }
    }
}

#[async_trait]
impl TaskDataset for MtDataset {
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
        let bleu = corpus_bleu(&artifacts.pairs);
        let mut metadata = Map::new();
        metadata.insert("bleu".to_string(), json!(bleu));
        metadata.insert("examples".to_string(), json!(artifacts.pairs.len()));
        Ok(MetricBundle {
            perf: bleu,
            perf_std: None,
            pretty_perf: format!("{bleu:.2}"),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_translation_scores_full_bleu() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::local(tmp.path()).unwrap());
        let dataset = MtDataset::new("flores-dev", store, "s3://bucket/eval");

        let artifacts = JobArtifacts {
            pairs: vec![(
                "the cat sat on the mat today".into(),
                "the cat sat on the mat today".into(),
            )],
        };
        let bundle = dataset.score(&artifacts).unwrap();
        assert!((bundle.perf - 100.0).abs() < 1e-6);
        assert_eq!(bundle.pretty_perf, "100.00");
    }
}
