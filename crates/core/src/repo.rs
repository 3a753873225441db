//! Repository traits over the relational store, plus an in-memory
//! implementation used by tests and the local catalog mode.
//!
//! The pipeline never issues raw queries; everything it needs from the
//! database goes through these narrow get/create/update contracts, passed
//! explicitly into the scheduler/computer/requester constructors.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::entities::{
    DatasetId, DatasetRecord, DeploymentStatus, EvaluationStatus, ModelId, ModelRecord,
    NewScore, ScoreRecord, TaskId, TaskRecord,
};
use crate::error::CoreError;

#[async_trait]
pub trait ModelRepo: Send + Sync {
    async fn get(&self, id: ModelId) -> Result<Option<ModelRecord>, CoreError>;

    /// Deployed models belonging to a task.
    async fn deployed_by_task(&self, task_id: TaskId) -> Result<Vec<ModelRecord>, CoreError>;

    /// Every deployed model (the `model_id: "*"` request form).
    async fn all_deployed(&self) -> Result<Vec<ModelRecord>, CoreError>;

    async fn set_evaluation_status(
        &self,
        id: ModelId,
        status: EvaluationStatus,
    ) -> Result<(), CoreError>;

    async fn set_deployment_status(
        &self,
        id: ModelId,
        status: DeploymentStatus,
    ) -> Result<(), CoreError>;
}

#[async_trait]
pub trait DatasetRepo: Send + Sync {
    async fn get(&self, id: DatasetId) -> Result<Option<DatasetRecord>, CoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<DatasetRecord>, CoreError>;
    async fn by_task(&self, task_id: TaskId) -> Result<Vec<DatasetRecord>, CoreError>;

    /// Every registered dataset (the `dataset_name: "*"` request form).
    async fn all(&self) -> Result<Vec<DatasetRecord>, CoreError>;
}

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, CoreError>;
}

#[async_trait]
pub trait ScoreRepo: Send + Sync {
    async fn find(
        &self,
        model_id: ModelId,
        dataset_id: DatasetId,
    ) -> Result<Option<ScoreRecord>, CoreError>;

    async fn create(&self, score: NewScore) -> Result<ScoreRecord, CoreError>;

    /// Replace the stored row matching `score.id` with the given record.
    async fn update(&self, score: &ScoreRecord) -> Result<(), CoreError>;
}

// ── In-memory store ───────────────────────────────────────────

#[derive(Default)]
struct Inner {
    models: HashMap<ModelId, ModelRecord>,
    datasets: HashMap<DatasetId, DatasetRecord>,
    tasks: HashMap<TaskId, TaskRecord>,
    scores: Vec<ScoreRecord>,
    next_score_id: i64,
}

/// In-memory implementation of all four repositories behind one lock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&self, model: ModelRecord) {
        self.inner.write().unwrap().models.insert(model.id, model);
    }

    pub fn add_dataset(&self, dataset: DatasetRecord) {
        self.inner
            .write()
            .unwrap()
            .datasets
            .insert(dataset.id, dataset);
    }

    pub fn add_task(&self, task: TaskRecord) {
        self.inner.write().unwrap().tasks.insert(task.id, task);
    }
}

#[async_trait]
impl ModelRepo for MemoryStore {
    async fn get(&self, id: ModelId) -> Result<Option<ModelRecord>, CoreError> {
        Ok(self.inner.read().unwrap().models.get(&id).cloned())
    }

    async fn deployed_by_task(&self, task_id: TaskId) -> Result<Vec<ModelRecord>, CoreError> {
        let inner = self.inner.read().unwrap();
        let mut models: Vec<ModelRecord> = inner
            .models
            .values()
            .filter(|m| m.task_id == task_id && m.deployment_status == DeploymentStatus::Deployed)
            .cloned()
            .collect();
        models.sort_by_key(|m| m.id);
        Ok(models)
    }

    async fn all_deployed(&self) -> Result<Vec<ModelRecord>, CoreError> {
        let inner = self.inner.read().unwrap();
        let mut models: Vec<ModelRecord> = inner
            .models
            .values()
            .filter(|m| m.deployment_status == DeploymentStatus::Deployed)
            .cloned()
            .collect();
        models.sort_by_key(|m| m.id);
        Ok(models)
    }

    async fn set_evaluation_status(
        &self,
        id: ModelId,
        status: EvaluationStatus,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let model = inner
            .models
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("model {id}")))?;
        model.evaluation_status = status;
        Ok(())
    }

    async fn set_deployment_status(
        &self,
        id: ModelId,
        status: DeploymentStatus,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let model = inner
            .models
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("model {id}")))?;
        model.deployment_status = status;
        Ok(())
    }
}

#[async_trait]
impl DatasetRepo for MemoryStore {
    async fn get(&self, id: DatasetId) -> Result<Option<DatasetRecord>, CoreError> {
        Ok(self.inner.read().unwrap().datasets.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<DatasetRecord>, CoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .datasets
            .values()
            .find(|d| d.name == name)
            .cloned())
    }

    async fn by_task(&self, task_id: TaskId) -> Result<Vec<DatasetRecord>, CoreError> {
        let inner = self.inner.read().unwrap();
        let mut datasets: Vec<DatasetRecord> = inner
            .datasets
            .values()
            .filter(|d| d.task_id == task_id)
            .cloned()
            .collect();
        datasets.sort_by_key(|d| d.id);
        Ok(datasets)
    }

    async fn all(&self) -> Result<Vec<DatasetRecord>, CoreError> {
        let inner = self.inner.read().unwrap();
        let mut datasets: Vec<DatasetRecord> = inner.datasets.values().cloned().collect();
        datasets.sort_by_key(|d| d.id);
        Ok(datasets)
    }
}

#[async_trait]
impl TaskRepo for MemoryStore {
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, CoreError> {
        Ok(self.inner.read().unwrap().tasks.get(&id).cloned())
    }
}

#[async_trait]
impl ScoreRepo for MemoryStore {
    async fn find(
        &self,
        model_id: ModelId,
        dataset_id: DatasetId,
    ) -> Result<Option<ScoreRecord>, CoreError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .scores
            .iter()
            .find(|s| s.model_id == model_id && s.dataset_id == dataset_id)
            .cloned())
    }

    async fn create(&self, score: NewScore) -> Result<ScoreRecord, CoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.next_score_id += 1;
        let record = ScoreRecord {
            id: inner.next_score_id,
            model_id: score.model_id,
            dataset_id: score.dataset_id,
            perf: score.perf,
            perf_std: score.perf_std,
            pretty_perf: score.pretty_perf,
            metadata: score.metadata,
        };
        inner.scores.push(record.clone());
        Ok(record)
    }

    async fn update(&self, score: &ScoreRecord) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let slot = inner
            .scores
            .iter_mut()
            .find(|s| s.id == score.id)
            .ok_or_else(|| CoreError::NotFound(format!("score {}", score.id)))?;
        *slot = score.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: ModelId, task_id: TaskId) -> ModelRecord {
        ModelRecord {
            id,
            task_id,
            name: format!("model-{id}"),
            endpoint_name: format!("ts{id}-model-{id}"),
            deployment_status: DeploymentStatus::Deployed,
            evaluation_status: EvaluationStatus::Evaluating,
        }
    }

    #[tokio::test]
    async fn deployed_by_task_filters_takendown() {
        let store = MemoryStore::new();
        store.add_model(model(1, 10));
        store.add_model(model(2, 10));
        store.add_model(ModelRecord {
            deployment_status: DeploymentStatus::Takendown,
            ..model(3, 10)
        });
        store.add_model(model(4, 20));

        let models = store.deployed_by_task(10).await.unwrap();
        let ids: Vec<ModelId> = models.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn set_evaluation_status_updates_record() {
        let store = MemoryStore::new();
        store.add_model(model(1, 10));
        store
            .set_evaluation_status(1, EvaluationStatus::Completed)
            .await
            .unwrap();
        let m = ModelRepo::get(&store, 1).await.unwrap().unwrap();
        assert_eq!(m.evaluation_status, EvaluationStatus::Completed);
    }

    #[tokio::test]
    async fn set_status_unknown_model_errors() {
        let store = MemoryStore::new();
        let err = store
            .set_evaluation_status(99, EvaluationStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn score_create_find_update() {
        let store = MemoryStore::new();
        let created = store
            .create(NewScore {
                model_id: 1,
                dataset_id: 2,
                perf: 80.0,
                perf_std: None,
                pretty_perf: "80.0%".into(),
                metadata: serde_json::json!({"accuracy": 80.0}),
            })
            .await
            .unwrap();
        assert!(created.id > 0);

        let mut found = store.find(1, 2).await.unwrap().unwrap();
        assert_eq!(found.perf, 80.0);

        found.perf = 85.0;
        store.update(&found).await.unwrap();
        assert_eq!(store.find(1, 2).await.unwrap().unwrap().perf, 85.0);

        assert!(store.find(1, 3).await.unwrap().is_none());
    }
}
