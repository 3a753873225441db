use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ModelId = i64;
pub type DatasetId = i64;
pub type TaskId = i64;

/// Where a model currently stands in the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Evaluating,
    Completed,
    Failed,
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationStatus::Evaluating => write!(f, "evaluating"),
            EvaluationStatus::Completed => write!(f, "completed"),
            EvaluationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Deployment state of a model's inference endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Deployed,
    Takendown,
    Failed,
}

/// A model under test, as the repository layer exposes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    pub task_id: TaskId,
    pub name: String,
    /// Name of the remote inference endpoint serving this model.
    pub endpoint_name: String,
    pub deployment_status: DeploymentStatus,
    pub evaluation_status: EvaluationStatus,
}

/// A registered evaluation dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub task_id: TaskId,
    pub name: String,
}

/// A task (NLI, QA, ...) grouping models and datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    /// Perturbation variants configured for this task (e.g. "fairness").
    pub perturb_types: Vec<String>,
}

/// One persisted score row per (model, dataset) pair.
///
/// `metadata` is a JSON object holding metric breakdowns by tag and, for
/// perturbed evaluations, prefix-namespaced delta figures merged in
/// incrementally as each perturbation job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: i64,
    pub model_id: ModelId,
    pub dataset_id: DatasetId,
    pub perf: f64,
    pub perf_std: Option<f64>,
    pub pretty_perf: String,
    pub metadata: Value,
}

/// Payload for creating a score row (id is assigned by the repository).
#[derive(Debug, Clone)]
pub struct NewScore {
    pub model_id: ModelId,
    pub dataset_id: DatasetId,
    pub perf: f64,
    pub perf_std: Option<f64>,
    pub pretty_perf: String,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_status_display() {
        assert_eq!(EvaluationStatus::Evaluating.to_string(), "evaluating");
        assert_eq!(EvaluationStatus::Completed.to_string(), "completed");
        assert_eq!(EvaluationStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn score_record_serde_roundtrip() {
        let score = ScoreRecord {
            id: 1,
            model_id: 7,
            dataset_id: 3,
            perf: 91.5,
            perf_std: Some(0.4),
            pretty_perf: "91.5%".to_string(),
            metadata: serde_json::json!({"accuracy": 91.5}),
        };
        let json = serde_json::to_string(&score).unwrap();
        let back: ScoreRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_id, 7);
        assert_eq!(back.metadata["accuracy"], 91.5);
    }
}
