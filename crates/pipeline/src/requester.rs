//! Requester: the façade the server loop drives.
//!
//! Turns decoded evaluation requests into queued jobs (expanding `"*"`
//! selectors and perturbation fan-out), delegates submission and status
//! polling to the scheduler/computer pair, and sweeps a model's remaining
//! work when the model container itself turns out to be broken.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use dynaeval_backend::compute::ComputeBackend;
use dynaeval_backend::monitor::MonitorBackend;
use dynaeval_backend::request::{DatasetSelector, EvalRequest, ModelSelector};
use dynaeval_core::config::EvalConfig;
use dynaeval_core::entities::{DeploymentStatus, EvaluationStatus, ModelId, ModelRecord};
use dynaeval_core::repo::{DatasetRepo, ModelRepo, ScoreRepo, TaskRepo};
use dynaeval_datasets::task::DatasetRegistry;

use crate::computer::MetricsComputer;
use crate::error::PipelineError;
use crate::scheduler::{JobList, JobScheduler};

pub struct Requester {
    scheduler: JobScheduler,
    computer: MetricsComputer,
    models: Arc<dyn ModelRepo>,
    datasets: Arc<dyn DatasetRepo>,
    tasks: Arc<dyn TaskRepo>,
    registry: Arc<DatasetRegistry>,
    /// Models already swept after an algorithm error; their failed jobs
    /// stay visible in the scheduler, so remember not to sweep twice.
    swept_models: HashSet<ModelId>,
}

impl Requester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EvalConfig,
        backend: Arc<dyn ComputeBackend>,
        monitor: Arc<dyn MonitorBackend>,
        models: Arc<dyn ModelRepo>,
        datasets: Arc<dyn DatasetRepo>,
        tasks: Arc<dyn TaskRepo>,
        scores: Arc<dyn ScoreRepo>,
        registry: Arc<DatasetRegistry>,
    ) -> Result<Self, PipelineError> {
        let scheduler = JobScheduler::new(config.clone(), backend, monitor, registry.clone());
        let computer = MetricsComputer::new(
            &config,
            scores,
            models.clone(),
            datasets.clone(),
            registry.clone(),
        )?;
        Ok(Self {
            scheduler,
            computer,
            models,
            datasets,
            tasks,
            registry,
            swept_models: HashSet::new(),
        })
    }

    /// Expand a request into queued jobs. Returns how many jobs were
    /// queued; requests resolving to nothing are not an error.
    pub async fn request(&mut self, request: &EvalRequest) -> Result<usize, PipelineError> {
        let mut queued = 0;
        match (&request.model, &request.dataset) {
            // Models only: each model runs over every dataset of its task.
            (Some(model_sel), None) => {
                for model in self.resolve_models(model_sel).await? {
                    self.mark_evaluating(&model).await;
                    for dataset in self.datasets.by_task(model.task_id).await? {
                        queued += self.enqueue_with_perturbations(&model, &dataset.name).await?;
                    }
                }
            }
            // Datasets only: every deployed model of the dataset's task.
            (None, Some(dataset_sel)) => {
                for name in self.resolve_datasets(dataset_sel).await? {
                    let (prefix, base) = DatasetRegistry::resolve(&name);
                    let Some(record) = self.datasets.get_by_name(base).await? else {
                        warn!(dataset = %name, "request names an unknown dataset");
                        continue;
                    };
                    for model in self.models.deployed_by_task(record.task_id).await? {
                        self.mark_evaluating(&model).await;
                        queued += match prefix {
                            Some(prefix) => self.enqueue_one(&model, base, prefix).await,
                            None => self.enqueue_with_perturbations(&model, base).await?,
                        };
                    }
                }
            }
            // Both: the cross product, skipping task mismatches.
            (Some(model_sel), Some(dataset_sel)) => {
                let models = self.resolve_models(model_sel).await?;
                let names = self.resolve_datasets(dataset_sel).await?;
                for model in &models {
                    self.mark_evaluating(model).await;
                    for name in &names {
                        let (prefix, base) = DatasetRegistry::resolve(name);
                        let Some(record) = self.datasets.get_by_name(base).await? else {
                            warn!(dataset = %name, "request names an unknown dataset");
                            continue;
                        };
                        if record.task_id != model.task_id {
                            warn!(
                                model_id = model.id,
                                dataset = %name,
                                "model and dataset belong to different tasks"
                            );
                            continue;
                        }
                        queued += match prefix {
                            Some(prefix) => self.enqueue_one(model, base, prefix).await,
                            None => self.enqueue_with_perturbations(model, base).await?,
                        };
                    }
                }
            }
            // The parser rejects empty requests before they get here.
            (None, None) => {}
        }
        info!(queued, "request expanded");
        Ok(queued)
    }

    async fn resolve_models(
        &self,
        selector: &ModelSelector,
    ) -> Result<Vec<ModelRecord>, PipelineError> {
        match selector {
            ModelSelector::All => Ok(self.models.all_deployed().await?),
            ModelSelector::Ids(ids) => {
                let mut models = Vec::with_capacity(ids.len());
                for &id in ids {
                    match self.models.get(id).await? {
                        Some(model) => models.push(model),
                        None => warn!(model_id = id, "request names an unknown model"),
                    }
                }
                Ok(models)
            }
        }
    }

    async fn resolve_datasets(
        &self,
        selector: &DatasetSelector,
    ) -> Result<Vec<String>, PipelineError> {
        match selector {
            DatasetSelector::All => {
                Ok(self.datasets.all().await?.into_iter().map(|d| d.name).collect())
            }
            DatasetSelector::Names(names) => Ok(names.clone()),
        }
    }

    async fn mark_evaluating(&self, model: &ModelRecord) {
        if let Err(e) = self
            .models
            .set_evaluation_status(model.id, EvaluationStatus::Evaluating)
            .await
        {
            warn!(model_id = model.id, error = %e, "evaluation status update failed");
        }
    }

    /// Queue the baseline job plus one job per perturbation the task
    /// configures and the dataset actually has files for.
    async fn enqueue_with_perturbations(
        &mut self,
        model: &ModelRecord,
        base_name: &str,
    ) -> Result<usize, PipelineError> {
        let Some(dataset) = self.registry.get(base_name) else {
            warn!(dataset = %base_name, "dataset not registered, skipping");
            return Ok(0);
        };
        let mut queued = 0;
        if dataset.available(None).await {
            self.scheduler.enqueue(model, base_name, None);
            queued += 1;
        } else {
            warn!(dataset = %base_name, "dataset file missing, skipping");
        }
        if let Some(task) = self.tasks.get(model.task_id).await? {
            for prefix in &task.perturb_types {
                if dataset.available(Some(prefix)).await {
                    self.scheduler.enqueue(model, base_name, Some(prefix));
                    queued += 1;
                }
            }
        }
        Ok(queued)
    }

    /// Queue exactly the named perturbed variant.
    async fn enqueue_one(&mut self, model: &ModelRecord, base_name: &str, prefix: &str) -> usize {
        let Some(dataset) = self.registry.get(base_name) else {
            warn!(dataset = %base_name, "dataset not registered, skipping");
            return 0;
        };
        if !dataset.available(Some(prefix)).await {
            warn!(dataset = %base_name, prefix, "perturbed file missing, skipping");
            return 0;
        }
        self.scheduler.enqueue(model, base_name, Some(prefix));
        1
    }

    /// Push queued jobs out to the backend, up to the submission cap.
    pub async fn submit(&mut self) -> usize {
        self.scheduler.submit().await
    }

    /// One full status cycle: poll the backend, sweep broken models, hand
    /// finished jobs to the computer, and persist any scored outcomes.
    pub async fn update_status(&mut self) {
        self.scheduler.update_status().await;
        self.sweep_algorithm_errors().await;
        let completed = self.scheduler.pop_jobs(JobList::Completed, None);
        self.computer.update_status(completed);
        self.computer.poll_outcomes().await;
    }

    /// An AlgorithmError means the model container is broken, not the
    /// dataset: cancel everything else the model has in flight, fail it,
    /// and request its endpoint be taken down.
    async fn sweep_algorithm_errors(&mut self) {
        let broken: Vec<ModelId> = {
            let mut seen = HashSet::new();
            self.scheduler
                .get_jobs(JobList::Failed)
                .iter()
                .filter(|j| j.status.as_ref().is_some_and(|s| s.is_algorithm_error()))
                .map(|j| j.model_id)
                .filter(|id| !self.swept_models.contains(id) && seen.insert(*id))
                .collect()
        };
        for model_id in broken {
            self.swept_models.insert(model_id);
            warn!(model_id, "algorithm error, cancelling the model's remaining jobs");

            let removed = self.scheduler.remove_model_jobs(model_id);
            for job in &removed {
                if job.job_name.is_some() {
                    self.scheduler.stop(job).await;
                }
            }
            let dropped = self.computer.remove_model_jobs(model_id);
            if !removed.is_empty() || !dropped.is_empty() {
                info!(
                    model_id,
                    cancelled = removed.len() + dropped.len(),
                    "jobs cancelled"
                );
            }
            if let Err(e) = self
                .models
                .set_evaluation_status(model_id, EvaluationStatus::Failed)
                .await
            {
                warn!(model_id, error = %e, "evaluation status update failed");
            }
            if let Err(e) = self
                .models
                .set_deployment_status(model_id, DeploymentStatus::Takendown)
                .await
            {
                warn!(model_id, error = %e, "deployment status update failed");
            }
        }
    }

    /// Persist any finished pool work without touching the remote backend.
    /// Cheap enough to run every driver iteration, unlike
    /// [`update_status`](Requester::update_status).
    pub async fn poll_outcomes(&mut self) -> usize {
        self.computer.poll_outcomes().await
    }

    /// Start scoring the next ready job, if any. Returns whether one was
    /// started.
    pub async fn compute_next(&mut self) -> bool {
        match self.computer.find_next_ready_job().await {
            Some(job) => {
                self.computer.compute_one_async(job).await;
                true
            }
            None => false,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn computer(&self) -> &MetricsComputer {
        &self.computer
    }
}
