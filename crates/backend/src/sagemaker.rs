//! SageMaker batch-transform implementation of [`ComputeBackend`].

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sagemaker::config::BehaviorVersion;
use aws_sdk_sagemaker::error::ProvideErrorMetadata;
use aws_sdk_sagemaker::types::{
    S3DataType, TransformDataSource, TransformInput, TransformInstanceType,
    TransformJobStatus, TransformOutput, TransformResources, TransformS3DataSource,
};
use aws_sdk_sagemaker::Client;
use tracing::{debug, info};

use dynaeval_core::config::AwsConfig;

use crate::compute::{ComputeBackend, JobState, RemoteJobStatus, TransformSpec};
use crate::error::ComputeError;

/// SageMaker-backed compute client.
pub struct SageMakerBackend {
    client: Client,
}

impl SageMakerBackend {
    /// Create a new backend from project config.
    ///
    /// The client config is built directly rather than via
    /// `aws_config::defaults()`, which reads `AWS_ENDPOINT_URL` from the
    /// environment and could route SageMaker calls to the wrong service.
    pub fn new(aws: &AwsConfig) -> Self {
        let region = aws_sdk_sagemaker::config::Region::new(aws.region.clone());

        let mut config = aws_sdk_sagemaker::Config::builder()
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
            config = config.credentials_provider(creds);
        }

        let client = Client::from_conf(config.build());
        info!(region = %aws.region, "SageMaker backend initialized");
        Self { client }
    }
}

fn map_state(status: &TransformJobStatus) -> JobState {
    match status {
        TransformJobStatus::InProgress => JobState::InProgress,
        TransformJobStatus::Completed => JobState::Completed,
        TransformJobStatus::Failed => JobState::Failed,
        TransformJobStatus::Stopping => JobState::Stopping,
        TransformJobStatus::Stopped => JobState::Stopped,
        _ => JobState::InProgress,
    }
}

/// Map an SDK error onto the taxonomy the scheduler switches on.
fn map_sdk_error(ctx: &str, code: Option<&str>, detail: String) -> ComputeError {
    match code {
        Some("ResourceLimitExceeded") => ComputeError::ResourceLimitExceeded,
        Some("ResourceInUse") => ComputeError::ResourceInUse,
        Some("ThrottlingException") => ComputeError::Throttled,
        Some("ResourceNotFound") => ComputeError::NotFound(ctx.to_string()),
        _ => ComputeError::Backend(format!("{ctx}: {detail}")),
    }
}

#[async_trait]
impl ComputeBackend for SageMakerBackend {
    async fn create_job(&self, spec: &TransformSpec) -> Result<(), ComputeError> {
        debug!(job = %spec.job_name, model = %spec.model_name, "creating transform job");

        let data_source = TransformDataSource::builder()
            .s3_data_source(
                TransformS3DataSource::builder()
                    .s3_data_type(S3DataType::S3Prefix)
                    .s3_uri(&spec.input_uri)
                    .build(),
            )
            .build();

        let input = TransformInput::builder()
            .data_source(data_source)
            .content_type(&spec.content_type)
            .build();

        let output = TransformOutput::builder()
            .s3_output_path(&spec.output_uri)
            .build();

        let resources = TransformResources::builder()
            .instance_type(TransformInstanceType::from(spec.instance_type.as_str()))
            .instance_count(spec.instance_count)
            .build();

        self.client
            .create_transform_job()
            .transform_job_name(&spec.job_name)
            .model_name(&spec.model_name)
            .transform_input(input)
            .transform_output(output)
            .transform_resources(resources)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    &format!("create_transform_job {}", spec.job_name),
                    e.code(),
                    format!("{e:?}"),
                )
            })?;

        Ok(())
    }

    async fn describe_job(&self, name: &str) -> Result<RemoteJobStatus, ComputeError> {
        let resp = self
            .client
            .describe_transform_job()
            .transform_job_name(name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    &format!("describe_transform_job {name}"),
                    e.code(),
                    format!("{e:?}"),
                )
            })?;

        let state = resp
            .transform_job_status()
            .map(map_state)
            .ok_or_else(|| ComputeError::Backend(format!("no status reported for {name}")))?;

        Ok(RemoteJobStatus {
            state,
            failure_reason: resp.failure_reason().map(|r| r.to_string()),
        })
    }

    async fn list_jobs(&self, name_contains: &str) -> Result<Vec<String>, ComputeError> {
        let resp = self
            .client
            .list_transform_jobs()
            .name_contains(name_contains)
            .send()
            .await
            .map_err(|e| map_sdk_error("list_transform_jobs", e.code(), format!("{e:?}")))?;

        Ok(resp
            .transform_job_summaries()
            .iter()
            .filter_map(|s| s.transform_job_name().map(|n| n.to_string()))
            .collect())
    }

    async fn stop_job(&self, name: &str) -> Result<(), ComputeError> {
        self.client
            .stop_transform_job()
            .transform_job_name(name)
            .send()
            .await
            .map_err(|e| {
                map_sdk_error(
                    &format!("stop_transform_job {name}"),
                    e.code(),
                    format!("{e:?}"),
                )
            })?;
        Ok(())
    }
}
