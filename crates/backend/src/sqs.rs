//! AWS SQS implementation of [`RequestSource`].

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::Client;
use chrono::{TimeZone, Utc};
use tracing::{debug, info};

use dynaeval_core::config::{AwsConfig, QueueConfig};

use crate::error::QueueError;
use crate::queue::{QueueMessage, RequestSource};

/// SQS-backed request source.
pub struct SqsRequestSource {
    client: Client,
    queue_url: String,
    visibility_timeout_secs: i32,
}

impl SqsRequestSource {
    /// Create a new source from project config.
    pub fn new(aws: &AwsConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        let queue_url = queue
            .queue_url
            .clone()
            .ok_or_else(|| QueueError::Connection("EVAL_QUEUE_URL not set".into()))?;

        let region = aws_sdk_sqs::config::Region::new(aws.region.clone());

        // Build SQS client config directly — do NOT use aws_config::defaults()
        // because it reads AWS_ENDPOINT_URL from the environment, which may
        // point at S3 and would route SQS requests to the wrong service.
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&aws.access_key_id, &aws.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                aws.session_token.clone(),
                None,
                "dynaeval-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        let client = Client::from_conf(sqs_config.build());

        info!(queue_url = %queue_url, region = %aws.region, "SQS request source initialized");

        Ok(Self {
            client,
            queue_url,
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
        })
    }
}

#[async_trait]
impl RequestSource for SqsRequestSource {
    async fn poll(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        // SQS caps at 10 messages per request.
        let capped = max_messages.min(10) as i32;

        debug!(max_messages = capped, "polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(1)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(aws_sdk_sqs::types::MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let sqs_messages = resp.messages.unwrap_or_default();
        debug!(count = sqs_messages.len(), "received SQS messages");

        let mut messages = Vec::with_capacity(sqs_messages.len());
        for msg in sqs_messages {
            let id = msg.message_id().unwrap_or("unknown").to_string();
            let body = msg.body().unwrap_or("").to_string();

            let receipt_handle = msg
                .receipt_handle()
                .ok_or_else(|| QueueError::Parse("missing receipt handle".into()))?
                .to_string();

            // SentTimestamp attribute is epoch millis.
            let timestamp = msg
                .attributes()
                .and_then(|attrs| {
                    attrs.get(&aws_sdk_sqs::types::MessageSystemAttributeName::SentTimestamp)
                })
                .and_then(|ts| ts.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .unwrap_or_else(Utc::now);

            messages.push(QueueMessage {
                id,
                body,
                receipt_handle,
                timestamp,
            });
        }

        Ok(messages)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "acking SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;

        Ok(())
    }
}
