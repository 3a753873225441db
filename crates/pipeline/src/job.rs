//! The unit of work flowing through the pipeline: one model evaluated on
//! one (possibly perturbed) dataset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dynaeval_backend::compute::RemoteJobStatus;
use dynaeval_core::entities::ModelId;

/// Remote job names must fit the backend's 63-character limit.
pub const MAX_JOB_NAME_LEN: usize = 63;

/// One evaluation job. Serialized verbatim into the status snapshots, so
/// every field a restart needs to resume lives here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub model_id: ModelId,
    /// Remote inference endpoint serving the model.
    pub endpoint_name: String,
    /// Base dataset name, without any perturbation prefix.
    pub dataset_name: String,
    pub perturb_prefix: Option<String>,
    /// Assigned at submission time; `None` while the job is still queued.
    pub job_name: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Last status the remote backend reported for this job.
    pub status: Option<RemoteJobStatus>,
    /// Averaged resource-utilization figures, filled in after completion.
    #[serde(default)]
    pub resource_metrics: HashMap<String, f64>,
}

impl Job {
    pub fn new(
        model_id: ModelId,
        endpoint_name: impl Into<String>,
        dataset_name: impl Into<String>,
        perturb_prefix: Option<&str>,
    ) -> Self {
        Self {
            model_id,
            endpoint_name: endpoint_name.into(),
            dataset_name: dataset_name.into(),
            perturb_prefix: perturb_prefix.map(str::to_string),
            job_name: None,
            submitted_at: None,
            status: None,
            resource_metrics: HashMap::new(),
        }
    }

    /// The dataset name as it appears in requests, prefix included.
    pub fn full_dataset_name(&self) -> String {
        match &self.perturb_prefix {
            Some(prefix) => format!("{}-{}", prefix, self.dataset_name),
            None => self.dataset_name.clone(),
        }
    }

    /// Derive and attach the remote job name for a submission at `now`.
    ///
    /// The unix-second suffix is what keeps names unique; when the full
    /// name would exceed the limit, the descriptive part is truncated and
    /// the suffix always survives intact.
    pub fn assign_name(&mut self, now: DateTime<Utc>) {
        let suffix = format!("-{}", now.timestamp());
        let mut base = match &self.perturb_prefix {
            Some(prefix) => format!("{}-{}-{}", self.endpoint_name, prefix, self.dataset_name),
            None => format!("{}-{}", self.endpoint_name, self.dataset_name),
        };
        let budget = MAX_JOB_NAME_LEN - suffix.len();
        if base.len() > budget {
            base.truncate(budget);
            // A trailing hyphen reads as a typo in the console.
            while base.ends_with('-') {
                base.pop();
            }
        }
        self.job_name = Some(format!("{base}{suffix}"));
        self.submitted_at = Some(now);
    }

    /// Job name for logging; queued jobs have not been named yet.
    pub fn name(&self) -> &str {
        self.job_name.as_deref().unwrap_or("<queued>")
    }

    /// Whether two `Job` values describe the same piece of work.
    pub fn same_as(&self, other: &Job) -> bool {
        self.model_id == other.model_id
            && self.dataset_name == other.dataset_name
            && self.perturb_prefix == other.perturb_prefix
            && self.job_name == other.job_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn name_carries_prefix_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        let mut job = Job::new(1, "ts1-bert", "mnli-dev", Some("fairness"));
        job.assign_name(now);
        assert_eq!(
            job.job_name.as_deref(),
            Some(&format!("ts1-bert-fairness-mnli-dev-{}", now.timestamp())[..])
        );
        assert_eq!(job.submitted_at, Some(now));
    }

    #[test]
    fn long_names_truncate_but_keep_timestamp() {
        let now = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        let endpoint = "ts1-a-very-long-endpoint-name-from-an-enthusiastic-submitter";
        let mut job = Job::new(1, endpoint, "robustness-heavy-dataset-name", None);
        job.assign_name(now);

        let name = job.job_name.as_deref().unwrap();
        assert!(name.len() <= MAX_JOB_NAME_LEN);
        assert!(name.ends_with(&format!("-{}", now.timestamp())));
        assert!(name.starts_with("ts1-a-very-long"));
    }

    #[test]
    fn same_second_names_differ_only_by_spacing() {
        // Two jobs named one second apart never collide, even for the same
        // model/dataset pair.
        let t0 = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(1);
        let mut a = Job::new(1, "ts1-bert", "mnli-dev", None);
        let mut b = Job::new(1, "ts1-bert", "mnli-dev", None);
        a.assign_name(t0);
        b.assign_name(t1);
        assert_ne!(a.job_name, b.job_name);
    }

    #[test]
    fn full_dataset_name_round_trips_prefix() {
        let job = Job::new(1, "e", "mnli-dev", Some("robustness"));
        assert_eq!(job.full_dataset_name(), "robustness-mnli-dev");
        let job = Job::new(1, "e", "mnli-dev", None);
        assert_eq!(job.full_dataset_name(), "mnli-dev");
    }
}
