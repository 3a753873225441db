//! Metrics computer: turns completed jobs into persisted score rows on a
//! CPU worker pool.
//!
//! Jobs arrive from the scheduler into `waiting`, move to `computing`
//! while a pool worker scores them, and on success leave the computer
//! entirely; the score row in the database is the durable result. Only
//! failures are retained, in `failed`.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use dynaeval_core::config::EvalConfig;
use dynaeval_core::entities::{EvaluationStatus, ModelId, NewScore};
use dynaeval_core::repo::{DatasetRepo, ModelRepo, ScoreRepo};
use dynaeval_datasets::task::{DatasetRegistry, MetricBundle};

use crate::error::PipelineError;
use crate::job::Job;
use crate::snapshot::{self, ComputerSnapshot, COMPUTER_SNAPSHOT};

/// Which computer list an accessor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputerList {
    Waiting,
    Computing,
    Failed,
}

/// What a pool worker sends back for one scored job.
struct Outcome {
    job: Job,
    result: Result<MetricBundle, String>,
}

pub struct MetricsComputer {
    scores: Arc<dyn ScoreRepo>,
    models: Arc<dyn ModelRepo>,
    datasets: Arc<dyn DatasetRepo>,
    registry: Arc<DatasetRegistry>,
    waiting: Vec<Job>,
    computing: Vec<Job>,
    failed: Vec<Job>,
    pool: rayon::ThreadPool,
    tx: Sender<Outcome>,
    rx: Receiver<Outcome>,
    snapshot_path: PathBuf,
}

impl MetricsComputer {
    /// Build a computer, resuming from the on-disk snapshot if present.
    ///
    /// Jobs that were `computing` at crash time lost their worker, so they
    /// go back to the front of `waiting` and are scored again.
    pub fn new(
        config: &EvalConfig,
        scores: Arc<dyn ScoreRepo>,
        models: Arc<dyn ModelRepo>,
        datasets: Arc<dyn DatasetRepo>,
        registry: Arc<DatasetRegistry>,
    ) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.compute_metric_threads)
            .thread_name(|i| format!("metric-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::Pool(e.to_string()))?;
        let (tx, rx) = std::sync::mpsc::channel();

        let snapshot_path = snapshot::snapshot_path(&config.status_dump_dir, COMPUTER_SNAPSHOT);
        let state: ComputerSnapshot = snapshot::load(&snapshot_path);
        let mut waiting = state.computing;
        waiting.extend(state.waiting);
        info!(
            waiting = waiting.len(),
            failed = state.failed.len(),
            "computer state loaded"
        );

        Ok(Self {
            scores,
            models,
            datasets,
            registry,
            waiting,
            computing: Vec::new(),
            failed: state.failed,
            pool,
            tx,
            rx,
            snapshot_path,
        })
    }

    /// Accept completed jobs from the scheduler.
    pub fn update_status(&mut self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        info!(count = jobs.len(), "jobs handed over for metric computation");
        self.waiting.extend(jobs);
        self.dump();
    }

    /// Take the first waiting job whose dependencies are satisfied,
    /// rotating unready jobs to the back. One pass over the list; returns
    /// `None` when nothing is ready yet.
    ///
    /// No dump here: the snapshot keeps the job in `waiting` until
    /// [`compute_one_async`](MetricsComputer::compute_one_async) records
    /// it as `computing`, so a crash in between re-queues it instead of
    /// losing it.
    pub async fn find_next_ready_job(&mut self) -> Option<Job> {
        for _ in 0..self.waiting.len() {
            let job = self.waiting.remove(0);
            if self.is_ready(&job).await {
                return Some(job);
            }
            self.waiting.push(job);
        }
        None
    }

    /// A baseline job is always ready. A perturbed job must wait until the
    /// baseline score row exists, since its delta is computed against it.
    async fn is_ready(&self, job: &Job) -> bool {
        if job.perturb_prefix.is_none() {
            return true;
        }
        let dataset = match self.datasets.get_by_name(&job.dataset_name).await {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                warn!(dataset = %job.dataset_name, "perturbed job names an unknown dataset");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "dataset lookup failed");
                return false;
            }
        };
        matches!(
            self.scores.find(job.model_id, dataset.id).await,
            Ok(Some(_))
        )
    }

    /// Score a job on the calling task, bypassing the worker pool. Used by
    /// operator tooling; the normal path is [`compute_one_async`].
    ///
    /// [`compute_one_async`]: MetricsComputer::compute_one_async
    pub async fn compute_one_blocking(&mut self, job: Job) {
        let Some(dataset) = self.registry.get(&job.dataset_name) else {
            self.log_job_error(job, "dataset not registered").await;
            return;
        };
        let result = match dataset
            .fetch_artifacts(job.name(), job.perturb_prefix.as_deref())
            .await
        {
            Ok(artifacts) => dataset.score(&artifacts).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        self.finish(job, result).await;
        self.dump();
    }

    /// Fetch a job's artifacts, then hand scoring to the worker pool. The
    /// job sits in `computing` (and is on disk as such) before any
    /// fallible work starts, so a crash mid-fetch re-queues it.
    pub async fn compute_one_async(&mut self, job: Job) {
        let Some(dataset) = self.registry.get(&job.dataset_name) else {
            self.log_job_error(job, "dataset not registered").await;
            return;
        };
        self.computing.push(job.clone());
        self.dump();

        let artifacts = match dataset
            .fetch_artifacts(job.name(), job.perturb_prefix.as_deref())
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                let message = e.to_string();
                self.log_job_error(job, &message).await;
                return;
            }
        };

        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let result = dataset.score(&artifacts).map_err(|e| e.to_string());
            // The receiver only goes away at shutdown.
            let _ = tx.send(Outcome { job, result });
        });
    }

    /// Drain finished pool work and persist it. Returns how many outcomes
    /// were handled.
    pub async fn poll_outcomes(&mut self) -> usize {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.rx.try_recv() {
            outcomes.push(outcome);
        }
        let handled = outcomes.len();
        for Outcome { job, result } in outcomes {
            self.finish(job, result).await;
        }
        if handled > 0 {
            self.dump();
        }
        handled
    }

    async fn finish(&mut self, job: Job, result: Result<MetricBundle, String>) {
        self.remove_computing(&job);
        match result {
            Ok(bundle) => match self.persist_metrics(&job, bundle).await {
                Ok(()) => info!(job = %job.name(), "metrics persisted"),
                Err(e) => {
                    let message = e.to_string();
                    self.log_job_error(job, &message).await;
                }
            },
            Err(message) => self.log_job_error(job, &message).await,
        }
    }

    /// Write the bundle into the score table.
    ///
    /// Baseline jobs create or refresh the (model, dataset) row, merging
    /// metadata key-by-key so figures merged in earlier survive a re-run.
    /// Perturbed jobs never get their own row; their numbers land in the
    /// baseline row's metadata under prefix-namespaced keys, including the
    /// delta against the baseline perf.
    async fn persist_metrics(
        &mut self,
        job: &Job,
        bundle: MetricBundle,
    ) -> Result<(), PipelineError> {
        let dataset = self
            .datasets
            .get_by_name(&job.dataset_name)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("dataset {}", job.dataset_name)))?;

        match &job.perturb_prefix {
            Some(prefix) => {
                let mut base = self
                    .scores
                    .find(job.model_id, dataset.id)
                    .await?
                    .ok_or_else(|| {
                        PipelineError::NotFound(format!(
                            "baseline score for model {} on {}",
                            job.model_id, job.dataset_name
                        ))
                    })?;
                let mut additions = Map::new();
                additions.insert(format!("{prefix}-perf"), json!(bundle.perf));
                if let Some(std) = bundle.perf_std {
                    additions.insert(format!("{prefix}-perf-std"), json!(std));
                }
                additions.insert(format!("{prefix}-perf-delta"), json!(base.perf - bundle.perf));
                for (key, value) in &bundle.metadata {
                    additions.insert(format!("{prefix}-{key}"), value.clone());
                }
                merge_metadata(&mut base.metadata, additions);
                self.scores.update(&base).await?;
            }
            None => match self.scores.find(job.model_id, dataset.id).await? {
                Some(mut existing) => {
                    existing.perf = bundle.perf;
                    existing.perf_std = bundle.perf_std;
                    existing.pretty_perf = bundle.pretty_perf;
                    merge_metadata(&mut existing.metadata, bundle.metadata);
                    self.scores.update(&existing).await?;
                }
                None => {
                    self.scores
                        .create(NewScore {
                            model_id: job.model_id,
                            dataset_id: dataset.id,
                            perf: bundle.perf,
                            perf_std: bundle.perf_std,
                            pretty_perf: bundle.pretty_perf,
                            metadata: Value::Object(bundle.metadata),
                        })
                        .await?;
                }
            },
        }

        self.finish_model_if_done(job.model_id).await;
        Ok(())
    }

    /// Fan-in barrier: the model is done evaluating once no job of its
    /// remains waiting or computing here.
    async fn finish_model_if_done(&self, model_id: ModelId) {
        let pending = self
            .waiting
            .iter()
            .chain(self.computing.iter())
            .any(|j| j.model_id == model_id);
        if pending {
            return;
        }
        if let Err(e) = self
            .models
            .set_evaluation_status(model_id, EvaluationStatus::Completed)
            .await
        {
            warn!(model_id, error = %e, "evaluation status update failed");
        } else {
            info!(model_id, "model evaluation complete");
        }
    }

    /// Record a job as failed and mark its model accordingly. The score
    /// table is left untouched.
    pub async fn log_job_error(&mut self, job: Job, message: &str) {
        error!(job = %job.name(), error = message, "metric computation failed");
        self.remove_computing(&job);
        if let Err(e) = self
            .models
            .set_evaluation_status(job.model_id, EvaluationStatus::Failed)
            .await
        {
            warn!(model_id = job.model_id, error = %e, "evaluation status update failed");
        }
        self.failed.push(job);
        self.dump();
    }

    fn remove_computing(&mut self, job: &Job) {
        self.computing.retain(|j| !j.same_as(job));
    }

    /// Drop every job for a model from `waiting` and `computing`, used
    /// when the model is being swept after an algorithm error.
    pub fn remove_model_jobs(&mut self, model_id: ModelId) -> Vec<Job> {
        let mut removed = Vec::new();
        for list in [&mut self.waiting, &mut self.computing] {
            let mut i = 0;
            while i < list.len() {
                if list[i].model_id == model_id {
                    removed.push(list.remove(i));
                } else {
                    i += 1;
                }
            }
        }
        if !removed.is_empty() {
            self.dump();
        }
        removed
    }

    pub fn get_jobs(&self, list: ComputerList) -> &[Job] {
        match list {
            ComputerList::Waiting => &self.waiting,
            ComputerList::Computing => &self.computing,
            ComputerList::Failed => &self.failed,
        }
    }

    /// Remove and return up to `limit` jobs from a list; `None` drains it.
    pub fn pop_jobs(&mut self, list: ComputerList, limit: Option<usize>) -> Vec<Job> {
        let source = match list {
            ComputerList::Waiting => &mut self.waiting,
            ComputerList::Computing => &mut self.computing,
            ComputerList::Failed => &mut self.failed,
        };
        let n = limit.unwrap_or(source.len()).min(source.len());
        let jobs: Vec<Job> = source.drain(..n).collect();
        if !jobs.is_empty() {
            self.dump();
        }
        jobs
    }

    fn dump(&self) {
        let state = ComputerSnapshot {
            waiting: self.waiting.clone(),
            computing: self.computing.clone(),
            failed: self.failed.clone(),
        };
        if let Err(e) = snapshot::save(&self.snapshot_path, &state) {
            error!(error = %e, "computer snapshot dump failed");
        }
    }
}

/// Merge `additions` into a metadata object, overwriting only the keys
/// being written. Non-object metadata is replaced by an object first.
fn merge_metadata(metadata: &mut Value, additions: Map<String, Value>) {
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let Some(object) = metadata.as_object_mut() {
        for (key, value) in additions {
            object.insert(key, value);
        }
    }
}

impl std::fmt::Debug for MetricsComputer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsComputer")
            .field("waiting", &self.waiting.len())
            .field("computing", &self.computing.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}
