use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aws: AwsConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub eval: EvalConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            aws: AwsConfig::from_env(),
            queue: QueueConfig::from_env(),
            storage: StorageConfig::from_env(),
            eval: EvalConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  aws:     region={}, bucket={}",
            self.aws.region,
            self.aws.s3_bucket.as_deref().unwrap_or("(none)")
        );
        tracing::info!(
            "  queue:   url={}",
            self.queue.queue_url.as_deref().unwrap_or("(none)")
        );
        tracing::info!("  storage: data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  eval:    server_id={}, max_submission={}, threads={}",
            self.eval.eval_server_id,
            self.eval.max_submission,
            self.eval.compute_metric_threads
        );
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env() -> Self {
        Self {
            region: env_or("AWS_REGION", "us-west-1"),
            access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            session_token: env_opt("AWS_SESSION_TOKEN"),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_prefix: env_opt("S3_PREFIX"),
            endpoint_url: env_opt("AWS_ENDPOINT_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.s3_bucket.is_some()
    }
}

// ── Request queue ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_url: Option<String>,
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    fn from_env() -> Self {
        Self {
            queue_url: env_opt("EVAL_QUEUE_URL"),
            visibility_timeout_secs: env_u64("EVAL_QUEUE_VISIBILITY_TIMEOUT", 60),
        }
    }
}

// ── Local storage ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Catalog file seeding the in-memory repositories in local mode.
    pub catalog_path: Option<PathBuf>,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            catalog_path: env_opt("EVAL_CATALOG").map(PathBuf::from),
        }
    }
}

// ── Evaluation pipeline ───────────────────────────────────────

/// Immutable pipeline configuration, passed into the scheduler, computer
/// and requester at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Identifier matched against inbound request messages.
    pub eval_server_id: String,
    /// Upper bound on concurrently submitted remote jobs.
    pub max_submission: usize,
    /// Directory holding the scheduler/computer status snapshots.
    pub status_dump_dir: PathBuf,
    /// Worker threads in the metric-computation pool.
    pub compute_metric_threads: usize,
    /// Driver loop sleep between iterations.
    pub poll_interval_s: u64,
    /// Interval gating full remote status refresh.
    pub full_refresh_interval_s: u64,
    /// Grace period before an unperturbed job may leave `submitted` after
    /// the backend reports success.
    pub completion_grace_s: u64,
}

impl EvalConfig {
    fn from_env() -> Self {
        Self {
            eval_server_id: env_or("EVAL_SERVER_ID", "default"),
            max_submission: env_usize("EVAL_MAX_SUBMISSION", 6),
            status_dump_dir: PathBuf::from(env_or("EVAL_STATUS_DIR", "data/status")),
            compute_metric_threads: env_usize("EVAL_COMPUTE_THREADS", 2),
            poll_interval_s: env_u64("EVAL_POLL_INTERVAL", 5),
            full_refresh_interval_s: env_u64("EVAL_FULL_REFRESH_INTERVAL", 300),
            completion_grace_s: env_u64("EVAL_COMPLETION_GRACE", 0),
        }
    }
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_server_id: "default".to_string(),
            max_submission: 6,
            status_dump_dir: PathBuf::from("data/status"),
            compute_metric_threads: 2,
            poll_interval_s: 5,
            full_refresh_interval_s: 300,
            completion_grace_s: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_config_defaults() {
        let config = EvalConfig::default();
        assert_eq!(config.eval_server_id, "default");
        assert_eq!(config.max_submission, 6);
        assert_eq!(config.compute_metric_threads, 2);
        assert_eq!(config.poll_interval_s, 5);
        assert_eq!(config.full_refresh_interval_s, 300);
        assert_eq!(config.completion_grace_s, 0);
    }
}
