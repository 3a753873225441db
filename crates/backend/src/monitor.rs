//! Monitoring backend trait for resource-utilization metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MonitorError;

/// Time range a metric query covers (usually the job's submission window).
#[derive(Debug, Clone, Copy)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The metrics/monitoring backend, reduced to the two calls the scheduler
/// makes after a job completes.
#[async_trait]
pub trait MonitorBackend: Send + Sync {
    /// Log stream names under the given prefix — one stream per host that
    /// ran the job.
    async fn list_log_streams(&self, prefix: &str) -> Result<Vec<String>, MonitorError>;

    /// Averaged datapoints for one metric on one host over the window.
    async fn metric_datapoints(
        &self,
        metric_name: &str,
        host: &str,
        window: &MetricWindow,
    ) -> Result<Vec<f64>, MonitorError>;
}
