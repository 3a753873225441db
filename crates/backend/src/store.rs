//! Object storage for dataset files and prediction outputs.

use std::path::Path as FsPath;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::info;

use dynaeval_core::config::AwsConfig;

use crate::error::StoreError;

/// Unified file store wrapping object_store, with an optional key prefix.
pub struct FileStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl FileStore {
    /// S3-backed store from project config.
    pub fn s3(aws: &AwsConfig) -> Result<Self, StoreError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StoreError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        if let Some(ref endpoint) = aws.endpoint_url {
            if !endpoint.is_empty() {
                // object_store requires absolute URLs
                let endpoint_url =
                    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                        endpoint.clone()
                    } else {
                        format!("https://{}", endpoint)
                    };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_endpoint(&endpoint_url)
                    .with_allow_http(endpoint_url.starts_with("http://"));
            }
        } else {
            builder = builder.with_url(&format!("s3://{}", bucket));
        }

        let store = builder.build()?;

        let prefix = aws
            .s3_prefix
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/')
            .to_string();

        info!("File store: s3://{}/{} ({})", bucket, prefix, aws.region);

        Ok(Self {
            store: Arc::new(store),
            prefix,
        })
    }

    /// Local filesystem store (tests and local mode).
    pub fn local(data_dir: &FsPath) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StoreError::Other(format!("local filesystem error: {e}")))?;
        info!("File store: local at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
        })
    }

    fn full_path(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Whether an object exists at the given key.
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.store.head(&self.full_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StoreError::ObjectStore(e)),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let result = self.store.get(&self.full_path(key)).await?;
        Ok(result.bytes().await?)
    }

    pub async fn put(&self, key: &str, data: Bytes) -> Result<(), StoreError> {
        self.store.put(&self.full_path(key), data.into()).await?;
        Ok(())
    }

    /// Keys under the given prefix, relative to the store's own prefix.
    pub async fn list(&self, key_prefix: &str) -> Result<Vec<String>, StoreError> {
        let full = self.full_path(key_prefix);
        let metas: Vec<_> = self.store.list(Some(&full)).try_collect().await?;
        let strip = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        Ok(metas
            .into_iter()
            .map(|m| {
                let loc = m.location.to_string();
                loc.strip_prefix(&strip).unwrap_or(&loc).to_string()
            })
            .collect())
    }

    /// Fetch an object and split it into non-empty lines (JSONL files).
    pub async fn get_lines(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.get(key).await?;
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| StoreError::Other(format!("{key} is not valid UTF-8: {e}")))?;
        Ok(text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }
}
