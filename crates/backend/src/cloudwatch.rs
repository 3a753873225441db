//! CloudWatch implementation of [`MonitorBackend`].
//!
//! Batch-transform hosts emit resource metrics into the
//! `/aws/sagemaker/TransformJobs` namespace, dimensioned by `Host`, and one
//! log stream per host under the same-named log group. The scheduler uses
//! the stream names to discover hosts, then averages each metric per host.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_cloudwatch::config::BehaviorVersion;
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use tracing::info;

use dynaeval_core::config::AwsConfig;

use crate::error::MonitorError;
use crate::monitor::{MetricWindow, MonitorBackend};

const TRANSFORM_NAMESPACE: &str = "/aws/sagemaker/TransformJobs";

/// CloudWatch metrics + logs client pair.
pub struct CloudWatchMonitor {
    metrics: aws_sdk_cloudwatch::Client,
    logs: aws_sdk_cloudwatchlogs::Client,
}

impl CloudWatchMonitor {
    pub fn new(aws: &AwsConfig) -> Self {
        let metrics = {
            let mut config = aws_sdk_cloudwatch::Config::builder()
                .region(aws_sdk_cloudwatch::config::Region::new(aws.region.clone()))
                .behavior_version(BehaviorVersion::latest());
            if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
                config = config.credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    aws.session_token.clone(),
                    None,
                    "dynaeval-static",
                ));
            }
            aws_sdk_cloudwatch::Client::from_conf(config.build())
        };

        let logs = {
            let mut config = aws_sdk_cloudwatchlogs::Config::builder()
                .region(aws_sdk_cloudwatchlogs::config::Region::new(
                    aws.region.clone(),
                ))
                .behavior_version(aws_sdk_cloudwatchlogs::config::BehaviorVersion::latest());
            if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
                config = config.credentials_provider(Credentials::new(
                    key_id,
                    secret,
                    aws.session_token.clone(),
                    None,
                    "dynaeval-static",
                ));
            }
            aws_sdk_cloudwatchlogs::Client::from_conf(config.build())
        };

        info!(region = %aws.region, "CloudWatch monitor initialized");
        Self { metrics, logs }
    }
}

#[async_trait]
impl MonitorBackend for CloudWatchMonitor {
    async fn list_log_streams(&self, prefix: &str) -> Result<Vec<String>, MonitorError> {
        let resp = self
            .logs
            .describe_log_streams()
            .log_group_name(TRANSFORM_NAMESPACE)
            .log_stream_name_prefix(prefix)
            .send()
            .await
            .map_err(|e| MonitorError::Backend(format!("describe_log_streams: {e:?}")))?;

        Ok(resp
            .log_streams()
            .iter()
            .filter_map(|s| s.log_stream_name().map(|n| n.to_string()))
            .collect())
    }

    async fn metric_datapoints(
        &self,
        metric_name: &str,
        host: &str,
        window: &MetricWindow,
    ) -> Result<Vec<f64>, MonitorError> {
        let dimension = Dimension::builder()
            .name("Host")
            .value(host)
            .build();

        let resp = self
            .metrics
            .get_metric_statistics()
            .namespace(TRANSFORM_NAMESPACE)
            .metric_name(metric_name)
            .dimensions(dimension)
            .start_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(
                window.start.timestamp(),
            ))
            .end_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(
                window.end.timestamp(),
            ))
            .period(60)
            .statistics(Statistic::Average)
            .send()
            .await
            .map_err(|e| MonitorError::Backend(format!("get_metric_statistics: {e:?}")))?;

        Ok(resp
            .datapoints()
            .iter()
            .filter_map(|d| d.average())
            .collect())
    }
}
