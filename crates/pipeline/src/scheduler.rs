//! Job scheduler: owns the queued/submitted/completed/failed lists and
//! drives jobs through the remote compute backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use dynaeval_backend::compute::{ComputeBackend, JobState};
use dynaeval_backend::error::ComputeError;
use dynaeval_backend::monitor::{MetricWindow, MonitorBackend};
use dynaeval_core::config::EvalConfig;
use dynaeval_core::entities::{ModelId, ModelRecord};
use dynaeval_datasets::task::DatasetRegistry;

use crate::job::Job;
use crate::snapshot::{self, SchedulerSnapshot, SCHEDULER_SNAPSHOT};

/// Pause after the backend throttles a submission, before the job goes
/// back to the queue.
const THROTTLE_BACKOFF: Duration = Duration::from_secs(1);

/// Utilization metrics recorded onto each completed job.
pub const RESOURCE_METRICS: &[&str] = &[
    "CPUUtilization",
    "MemoryUtilization",
    "GPUUtilization",
    "GPUMemoryUtilization",
];

/// Which scheduler list an accessor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobList {
    Queued,
    Submitted,
    Completed,
    Failed,
}

/// How one submission attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the backend; the job is now in `submitted`.
    Submitted,
    /// Transient backend pushback; the job went back to `queued`.
    Requeued,
    /// A job with this name already exists remotely. Treated as submitted
    /// so the poller picks up whatever that job does.
    AlreadyExists,
    /// Non-retryable rejection; the job is in `failed`.
    Failed,
}

pub struct JobScheduler {
    config: EvalConfig,
    backend: Arc<dyn ComputeBackend>,
    monitor: Arc<dyn MonitorBackend>,
    registry: Arc<DatasetRegistry>,
    queued: Vec<Job>,
    submitted: Vec<Job>,
    completed: Vec<Job>,
    failed: Vec<Job>,
    /// Unix second of the last submission, for name-uniqueness spacing.
    last_submission_ts: Option<i64>,
    snapshot_path: PathBuf,
}

impl JobScheduler {
    /// Build a scheduler, resuming from the on-disk snapshot if present.
    ///
    /// Jobs that were `submitted` at crash time stay submitted: the remote
    /// backend kept running them, so the next status poll sorts them out.
    pub fn new(
        config: EvalConfig,
        backend: Arc<dyn ComputeBackend>,
        monitor: Arc<dyn MonitorBackend>,
        registry: Arc<DatasetRegistry>,
    ) -> Self {
        let snapshot_path = snapshot::snapshot_path(&config.status_dump_dir, SCHEDULER_SNAPSHOT);
        let state: SchedulerSnapshot = snapshot::load(&snapshot_path);
        info!(
            queued = state.queued.len(),
            submitted = state.submitted.len(),
            completed = state.completed.len(),
            failed = state.failed.len(),
            "scheduler state loaded"
        );
        Self {
            config,
            backend,
            monitor,
            registry,
            queued: state.queued,
            submitted: state.submitted,
            completed: state.completed,
            failed: state.failed,
            last_submission_ts: None,
            snapshot_path,
        }
    }

    /// Queue one evaluation job. Duplicates are allowed; re-running an
    /// evaluation is an explicit operator action, not an error.
    pub fn enqueue(&mut self, model: &ModelRecord, dataset_name: &str, perturb_prefix: Option<&str>) {
        let job = Job::new(model.id, &model.endpoint_name, dataset_name, perturb_prefix);
        info!(
            model_id = model.id,
            dataset = %job.full_dataset_name(),
            "job queued"
        );
        self.queued.push(job);
        self.dump();
    }

    /// Submit queued jobs FIFO until the concurrent-submission cap is hit.
    /// Returns how many jobs were handed to the backend.
    pub async fn submit(&mut self) -> usize {
        let capacity = self
            .config
            .max_submission
            .saturating_sub(self.submitted.len());
        let mut sent = 0;
        for _ in 0..capacity {
            if self.queued.is_empty() {
                break;
            }
            let job = self.queued.remove(0);
            match self.submit_one(job).await {
                SubmitOutcome::Submitted | SubmitOutcome::AlreadyExists => sent += 1,
                // Backend pushback applies to the whole account, not this
                // one job; stop submitting until the next cycle.
                SubmitOutcome::Requeued => break,
                SubmitOutcome::Failed => {}
            }
        }
        self.dump();
        sent
    }

    async fn submit_one(&mut self, mut job: Job) -> SubmitOutcome {
        let Some(dataset) = self.registry.get(&job.dataset_name) else {
            warn!(dataset = %job.dataset_name, "job names an unregistered dataset");
            self.failed.push(job);
            return SubmitOutcome::Failed;
        };

        self.space_submissions().await;
        let now = Utc::now();
        job.assign_name(now);
        self.last_submission_ts = Some(now.timestamp());

        let name = job.name().to_string();
        let result = dataset
            .run_batch_transform(
                self.backend.as_ref(),
                &job.endpoint_name,
                &name,
                job.perturb_prefix.as_deref(),
            )
            .await;

        match result {
            Ok(()) => {
                info!(job = %name, "job submitted");
                self.submitted.push(job);
                SubmitOutcome::Submitted
            }
            Err(ComputeError::ResourceInUse) => {
                warn!(job = %name, "job name already exists remotely, tracking it");
                self.submitted.push(job);
                SubmitOutcome::AlreadyExists
            }
            Err(ComputeError::ResourceLimitExceeded) => {
                warn!(job = %name, "transform job limit reached, requeueing");
                job.job_name = None;
                job.submitted_at = None;
                self.queued.push(job);
                SubmitOutcome::Requeued
            }
            Err(ComputeError::Throttled) => {
                warn!(job = %name, "backend throttled the submission, backing off");
                tokio::time::sleep(THROTTLE_BACKOFF).await;
                job.job_name = None;
                job.submitted_at = None;
                self.queued.push(job);
                SubmitOutcome::Requeued
            }
            Err(e) => {
                error!(job = %name, error = %e, "submission failed");
                self.failed.push(job);
                SubmitOutcome::Failed
            }
        }
    }

    /// Sleep until the wall clock has left the unix second of the last
    /// submission, so consecutive job names never share a timestamp.
    async fn space_submissions(&self) {
        if let Some(last_ts) = self.last_submission_ts {
            let now = Utc::now();
            if now.timestamp() <= last_ts {
                let boundary_ms = (last_ts + 1) * 1000;
                let wait = (boundary_ms - now.timestamp_millis()).max(0) as u64 + 20;
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }
    }

    /// Poll the backend for every submitted job and sort finished jobs
    /// into `completed`/`failed`. Describe errors leave the job in place
    /// for the next poll.
    pub async fn update_status(&mut self) {
        let mut still_submitted = Vec::new();
        for mut job in std::mem::take(&mut self.submitted) {
            let Some(name) = job.job_name.clone() else {
                warn!("submitted job without a name, discarding to failed");
                self.failed.push(job);
                continue;
            };
            let status = match self.backend.describe_job(&name).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(job = %name, error = %e, "describe failed, will retry");
                    still_submitted.push(job);
                    continue;
                }
            };
            job.status = Some(status.clone());
            match status.state {
                JobState::Completed => {
                    if self.grace_elapsed(&job) {
                        self.fetch_resource_metrics(&mut job).await;
                        info!(job = %name, "job completed");
                        self.completed.push(job);
                    } else {
                        still_submitted.push(job);
                    }
                }
                JobState::Failed | JobState::Stopped => {
                    warn!(
                        job = %name,
                        reason = status.failure_reason.as_deref().unwrap_or("unknown"),
                        "job failed remotely"
                    );
                    self.failed.push(job);
                }
                JobState::InProgress | JobState::Stopping => still_submitted.push(job),
            }
        }
        self.submitted = still_submitted;
        self.dump();
    }

    /// Perturbed jobs leave `submitted` as soon as the backend reports
    /// success; baseline jobs honor the configured grace period so an
    /// evaluation round can be held open past its first completion.
    fn grace_elapsed(&self, job: &Job) -> bool {
        if job.perturb_prefix.is_some() || self.config.completion_grace_s == 0 {
            return true;
        }
        match job.submitted_at {
            Some(at) => {
                let elapsed = (Utc::now() - at).num_seconds();
                elapsed >= self.config.completion_grace_s as i64
            }
            None => true,
        }
    }

    /// Average each utilization metric across the hosts that ran the job.
    /// Best-effort: a monitoring outage never blocks completion.
    async fn fetch_resource_metrics(&self, job: &mut Job) {
        if !job.resource_metrics.is_empty() {
            return;
        }
        let (Some(name), Some(start)) = (job.job_name.as_deref(), job.submitted_at) else {
            return;
        };
        let hosts = match self.monitor.list_log_streams(name).await {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(job = %name, error = %e, "log stream listing failed");
                return;
            }
        };
        let window = MetricWindow {
            start,
            end: Utc::now(),
        };
        for metric in RESOURCE_METRICS {
            let mut points = Vec::new();
            for host in &hosts {
                match self.monitor.metric_datapoints(metric, host, &window).await {
                    Ok(mut datapoints) => points.append(&mut datapoints),
                    Err(e) => warn!(job = %name, metric, error = %e, "metric query failed"),
                }
            }
            if !points.is_empty() {
                let avg = points.iter().sum::<f64>() / points.len() as f64;
                job.resource_metrics.insert(metric.to_string(), avg);
            }
        }
    }

    /// Ask the backend to stop a submitted job. Best-effort; the job still
    /// reports a terminal status through the normal poll.
    pub async fn stop(&self, job: &Job) {
        if let Some(name) = job.job_name.as_deref() {
            if let Err(e) = self.backend.stop_job(name).await {
                warn!(job = %name, error = %e, "stop request failed");
            }
        }
    }

    /// Pull every job for a model out of `queued` and `submitted`, used
    /// when the model itself turns out to be broken. Returns the removed
    /// jobs so the caller can stop the in-flight ones.
    pub fn remove_model_jobs(&mut self, model_id: ModelId) -> Vec<Job> {
        let mut removed = Vec::new();
        for list in [&mut self.queued, &mut self.submitted] {
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

    /// Remove and return up to `limit` jobs from a list (front first);
    /// `None` drains the whole list.
    pub fn pop_jobs(&mut self, list: JobList, limit: Option<usize>) -> Vec<Job> {
        let source = self.list_mut(list);
        let n = limit.unwrap_or(source.len()).min(source.len());
        let jobs: Vec<Job> = source.drain(..n).collect();
        if !jobs.is_empty() {
            self.dump();
        }
        jobs
    }

    pub fn get_jobs(&self, list: JobList) -> &[Job] {
        match list {
            JobList::Queued => &self.queued,
            JobList::Submitted => &self.submitted,
            JobList::Completed => &self.completed,
            JobList::Failed => &self.failed,
        }
    }

    fn list_mut(&mut self, list: JobList) -> &mut Vec<Job> {
        match list {
            JobList::Queued => &mut self.queued,
            JobList::Submitted => &mut self.submitted,
            JobList::Completed => &mut self.completed,
            JobList::Failed => &mut self.failed,
        }
    }

    /// Persist the current lists. Dump failures are logged, not raised; a
    /// full status disk must not take the pipeline down with it.
    fn dump(&self) {
        let state = SchedulerSnapshot {
            queued: self.queued.clone(),
            submitted: self.submitted.clone(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        };
        if let Err(e) = snapshot::save(&self.snapshot_path, &state) {
            error!(error = %e, "scheduler snapshot dump failed");
        }
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("queued", &self.queued.len())
            .field("submitted", &self.submitted.len())
            .field("completed", &self.completed.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{model_record, registry_with, MockComputeBackend, MockDataset, NullMonitor};
    use dynaeval_backend::compute::RemoteJobStatus;

    fn scheduler(
        backend: Arc<MockComputeBackend>,
        registry: Arc<DatasetRegistry>,
        dir: &std::path::Path,
        max_submission: usize,
    ) -> JobScheduler {
        let config = EvalConfig {
            max_submission,
            status_dump_dir: dir.to_path_buf(),
            ..EvalConfig::default()
        };
        JobScheduler::new(config, backend, Arc::new(NullMonitor), registry)
    }

    #[tokio::test]
    async fn submission_respects_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 2);

        let model = model_record(1, 10);
        for _ in 0..4 {
            sched.enqueue(&model, "mnli-dev", None);
        }
        let sent = sched.submit().await;
        assert_eq!(sent, 2);
        assert_eq!(sched.get_jobs(JobList::Submitted).len(), 2);
        assert_eq!(sched.get_jobs(JobList::Queued).len(), 2);
        assert_eq!(backend.created().len(), 2);
    }

    #[tokio::test]
    async fn same_pair_submissions_get_distinct_names() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        let model = model_record(1, 10);
        sched.enqueue(&model, "mnli-dev", None);
        sched.enqueue(&model, "mnli-dev", None);
        sched.submit().await;

        let names = backend.created();
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[tokio::test]
    async fn limit_exceeded_requeues_to_back() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        backend.script_create(Err(ComputeError::ResourceLimitExceeded));
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        let model = model_record(1, 10);
        sched.enqueue(&model, "mnli-dev", None);
        let sent = sched.submit().await;

        assert_eq!(sent, 0);
        assert_eq!(sched.get_jobs(JobList::Queued).len(), 1);
        assert!(sched.get_jobs(JobList::Submitted).is_empty());
        // The requeued job lost its stale name.
        assert!(sched.get_jobs(JobList::Queued)[0].job_name.is_none());
    }

    #[tokio::test]
    async fn throttled_submission_backs_off_and_requeues() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        backend.script_create(Err(ComputeError::Throttled));
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        sched.enqueue(&model_record(2, 10), "mnli-dev", None);
        let started = std::time::Instant::now();
        let sent = sched.submit().await;

        // Throttling stops the whole submit cycle after a pause; both jobs
        // wait for the next one.
        assert!(started.elapsed() >= THROTTLE_BACKOFF);
        assert_eq!(sent, 0);
        assert_eq!(sched.get_jobs(JobList::Queued).len(), 2);
        assert!(sched.get_jobs(JobList::Queued).iter().all(|j| j.job_name.is_none()));
        assert!(sched.get_jobs(JobList::Submitted).is_empty());
    }

    #[tokio::test]
    async fn resource_in_use_counts_as_submitted() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        backend.script_create(Err(ComputeError::ResourceInUse));
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        let sent = sched.submit().await;

        assert_eq!(sent, 1);
        assert_eq!(sched.get_jobs(JobList::Submitted).len(), 1);
    }

    #[tokio::test]
    async fn unregistered_dataset_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![]);
        let mut sched = scheduler(backend, registry, tmp.path(), 6);

        sched.enqueue(&model_record(1, 10), "nope-dev", None);
        sched.submit().await;

        assert_eq!(sched.get_jobs(JobList::Failed).len(), 1);
        assert!(sched.get_jobs(JobList::Queued).is_empty());
    }

    #[tokio::test]
    async fn status_poll_moves_terminal_jobs() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        let model = model_record(1, 10);
        sched.enqueue(&model, "mnli-dev", None);
        sched.enqueue(&model, "mnli-dev", None);
        sched.enqueue(&model, "mnli-dev", None);
        sched.submit().await;

        let names = backend.created();
        backend.set_status(&names[0], RemoteJobStatus {
            state: JobState::Completed,
            failure_reason: None,
        });
        backend.set_status(&names[1], RemoteJobStatus {
            state: JobState::Failed,
            failure_reason: Some("ClientError: bad manifest".into()),
        });
        // names[2] stays at the mock's default InProgress.

        sched.update_status().await;
        assert_eq!(sched.get_jobs(JobList::Completed).len(), 1);
        assert_eq!(sched.get_jobs(JobList::Failed).len(), 1);
        assert_eq!(sched.get_jobs(JobList::Submitted).len(), 1);
    }

    #[tokio::test]
    async fn completed_jobs_pick_up_resource_metrics() {
        use crate::testutil::MockMonitor;

        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let config = EvalConfig {
            status_dump_dir: tmp.path().to_path_buf(),
            ..EvalConfig::default()
        };
        let monitor = Arc::new(MockMonitor {
            hosts: vec!["host-a".into(), "host-b".into()],
            points: vec![50.0, 70.0],
        });
        let mut sched = JobScheduler::new(config, backend.clone(), monitor, registry);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        sched.submit().await;
        let name = backend.created()[0].clone();
        backend.set_status(&name, RemoteJobStatus {
            state: JobState::Completed,
            failure_reason: None,
        });

        sched.update_status().await;
        let completed = sched.get_jobs(JobList::Completed);
        assert_eq!(completed.len(), 1);
        for metric in RESOURCE_METRICS {
            assert_eq!(completed[0].resource_metrics[*metric], 60.0);
        }
    }

    #[tokio::test]
    async fn describe_error_leaves_job_submitted() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        backend.fail_describe();
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend.clone(), registry, tmp.path(), 6);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        sched.submit().await;
        sched.update_status().await;

        assert_eq!(sched.get_jobs(JobList::Submitted).len(), 1);
        assert!(sched.get_jobs(JobList::Completed).is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);

        {
            let mut sched = scheduler(backend.clone(), registry.clone(), tmp.path(), 6);
            sched.enqueue(&model_record(1, 10), "mnli-dev", None);
            sched.enqueue(&model_record(1, 10), "mnli-dev", Some("fairness"));
            sched.submit().await;
        }

        // A fresh scheduler on the same dir resumes with the same lists:
        // submitted jobs stay submitted, the remote backend still has them.
        let sched = scheduler(backend, registry, tmp.path(), 6);
        assert_eq!(sched.get_jobs(JobList::Submitted).len(), 2);
        assert!(sched.get_jobs(JobList::Queued).is_empty());
    }

    #[tokio::test]
    async fn remove_model_jobs_sweeps_both_lists() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend, registry, tmp.path(), 1);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        sched.enqueue(&model_record(1, 10), "mnli-dev", Some("fairness"));
        sched.enqueue(&model_record(2, 10), "mnli-dev", None);
        sched.submit().await; // cap 1: only the first goes out

        let removed = sched.remove_model_jobs(1);
        assert_eq!(removed.len(), 2);
        assert_eq!(sched.get_jobs(JobList::Queued).len(), 1);
        assert_eq!(sched.get_jobs(JobList::Queued)[0].model_id, 2);
        assert!(sched.get_jobs(JobList::Submitted).is_empty());
    }

    #[tokio::test]
    async fn pop_jobs_drains_front_first() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(MockComputeBackend::new());
        let registry = registry_with(vec![MockDataset::passing("mnli-dev")]);
        let mut sched = scheduler(backend, registry, tmp.path(), 6);

        sched.enqueue(&model_record(1, 10), "mnli-dev", None);
        sched.enqueue(&model_record(2, 10), "mnli-dev", None);
        sched.enqueue(&model_record(3, 10), "mnli-dev", None);

        let two = sched.pop_jobs(JobList::Queued, Some(2));
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].model_id, 1);
        assert_eq!(sched.get_jobs(JobList::Queued).len(), 1);

        let rest = sched.pop_jobs(JobList::Queued, None);
        assert_eq!(rest.len(), 1);
    }
}
