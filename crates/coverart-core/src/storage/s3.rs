//! S3-compatible storage backend.
//!
//! Works against AWS S3 and S3-compatible services (DigitalOcean Spaces,
//! Backblaze B2, MinIO). Credentials come from the configuration when set,
//! otherwise from the standard AWS provider chain.

use super::{ObjectStore, PutRequest};
use crate::config::{Config, PipelineConfig, StorageConfig};
use crate::error::{ConfigError, PipelineError, PipelineResult};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::ObjectCannedAcl,
    Client,
};

/// S3-compatible storage backend.
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Wrap an already-configured client.
    pub fn new(name: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the `[storage]` section.
    ///
    /// Explicit `key_id`/`key_secret` take precedence; when they don't
    /// resolve, the AWS default provider chain is used instead.
    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let storage = &config.storage;
        let retry = sdk_retry_config(&config.pipeline);
        let client = match config.storage_credentials() {
            Ok((key_id, key_secret)) => {
                Self::explicit_client(storage, retry, key_id, key_secret)
            }
            Err(e) => {
                tracing::debug!("Using AWS default credential chain ({e})");
                Self::default_chain_client(storage, retry).await
            }
        };
        Ok(Self::new("s3", client, storage.bucket.clone()))
    }

    fn explicit_client(
        storage: &StorageConfig,
        retry: RetryConfig,
        key_id: String,
        key_secret: String,
    ) -> Client {
        let credentials = Credentials::new(key_id, key_secret, None, None, "coverart-config");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(storage.region.clone()))
            .retry_config(retry);
        if let Some(endpoint) = &storage.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Client::from_conf(builder.build())
    }

    async fn default_chain_client(storage: &StorageConfig, retry: RetryConfig) -> Client {
        let region = RegionProviderChain::first_try(Region::new(storage.region.clone()))
            .or_default_provider();
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .retry_config(retry);
        if let Some(endpoint) = &storage.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        Client::new(&loader.load().await)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// SDK-level retries follow `pipeline.retry_attempts`; zero disables them.
fn sdk_retry_config(pipeline: &PipelineConfig) -> RetryConfig {
    match pipeline.retry_attempts {
        0 => RetryConfig::disabled(),
        attempts => RetryConfig::standard().with_max_attempts(attempts.saturating_add(1)),
    }
}

/// Classify an SDK failure: transport failures mean the storage service is
/// unreachable, everything else is scoped to the key being touched.
fn sdk_error<E, R>(key: &str, err: SdkError<E, R>) -> PipelineError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) => PipelineError::Connection {
            service: "object storage".to_string(),
            message,
        },
        _ => PipelineError::Storage {
            key: key.to_string(),
            message,
        },
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, key: &str) -> PipelineResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err))
                if service_err.err().is_not_found() || service_err.raw().status().as_u16() == 404 =>
            {
                Ok(false)
            }
            Err(e) => Err(sdk_error(key, e)),
        }
    }

    async fn put(&self, request: PutRequest) -> PipelineResult<()> {
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .content_type(request.content_type)
            .cache_control(request.cache_control)
            .body(ByteStream::from(request.body));
        if request.public_read {
            put = put.acl(ObjectCannedAcl::PublicRead);
        }
        put.send().await.map_err(|e| sdk_error(&request.key, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_retries_disabled_by_default() {
        let retry = sdk_retry_config(&PipelineConfig::default());
        assert_eq!(retry.max_attempts(), 1);
    }

    #[test]
    fn test_sdk_retries_follow_retry_attempts() {
        let pipeline = PipelineConfig {
            retry_attempts: 2,
            ..PipelineConfig::default()
        };
        assert_eq!(sdk_retry_config(&pipeline).max_attempts(), 3);
    }
}
