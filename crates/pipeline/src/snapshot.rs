//! Disk snapshots of the scheduler and computer queues.
//!
//! Both components dump their lists to JSON after every mutation and
//! reload them at startup, which is the entire crash-recovery story: a
//! restarted process resumes from whatever the last dump recorded.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::job::Job;

pub const SCHEDULER_SNAPSHOT: &str = "scheduler.json";
pub const COMPUTER_SNAPSHOT: &str = "computer.json";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub queued: Vec<Job>,
    pub submitted: Vec<Job>,
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ComputerSnapshot {
    pub waiting: Vec<Job>,
    pub computing: Vec<Job>,
    pub failed: Vec<Job>,
}

pub fn snapshot_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}

/// Write a snapshot atomically: temp file in the same directory, then
/// rename over the target so a crash mid-write never leaves a torn file.
pub fn save<T: Serialize>(path: &Path, snapshot: &T) -> Result<(), PipelineError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a snapshot, or the empty default when the file is missing. A
/// corrupt file is logged and treated as empty rather than blocking
/// startup.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot corrupt, starting empty");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = snapshot_path(tmp.path(), SCHEDULER_SNAPSHOT);

        let mut snapshot = SchedulerSnapshot::default();
        snapshot.queued.push(Job::new(1, "ep", "mnli-dev", None));
        let mut submitted = Job::new(2, "ep2", "squad-dev", Some("fairness"));
        submitted.assign_name(chrono::Utc::now());
        submitted
            .resource_metrics
            .insert("CPUUtilization".to_string(), 61.5);
        snapshot.submitted.push(submitted);
        save(&path, &snapshot).unwrap();

        let back: SchedulerSnapshot = load(&path);
        assert_eq!(back.queued.len(), 1);
        assert_eq!(back.submitted.len(), 1);
        assert_eq!(back.submitted[0].perturb_prefix.as_deref(), Some("fairness"));
        assert_eq!(back.submitted[0].resource_metrics["CPUUtilization"], 61.5);
        assert!(back.submitted[0].job_name.is_some());
        assert!(back.completed.is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot: ComputerSnapshot = load(&tmp.path().join("nope.json"));
        assert!(snapshot.waiting.is_empty());
        assert!(snapshot.computing.is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("computer.json");
        fs::write(&path, b"{ not json").unwrap();
        let snapshot: ComputerSnapshot = load(&path);
        assert!(snapshot.waiting.is_empty());
    }

    #[test]
    fn save_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/status/scheduler.json");
        save(&path, &SchedulerSnapshot::default()).unwrap();
        assert!(path.exists());
    }
}
