//! Publishing variant payloads to object storage.

use futures_util::future::try_join_all;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::storage::{PutRequest, StoreHandle};
use crate::types::{KeyLayout, VariantPayload};

use super::retry::RetryPolicy;

/// Writes the four variants of a digest, all or nothing.
pub struct Uploader {
    store: StoreHandle,
    layout: KeyLayout,
    cache_control: String,
    public_read: bool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Uploader {
    pub fn new(config: &Config, store: StoreHandle) -> Self {
        Self {
            store,
            layout: KeyLayout::from_config(config),
            cache_control: config.storage.cache_control.clone(),
            public_read: config.storage.public_read,
            timeout: config.limits.upload_timeout(),
            retry: RetryPolicy::from_config(&config.pipeline),
        }
    }

    /// Put every payload, returning the written keys.
    ///
    /// The other variants go up concurrently; the probe variant is written
    /// only once they all succeeded, so its presence implies a complete set.
    pub async fn upload(&self, payloads: Vec<VariantPayload>) -> PipelineResult<Vec<String>> {
        let (probe, rest): (Vec<_>, Vec<_>) = payloads
            .into_iter()
            .partition(|p| p.variant == self.layout.probe(&p.variant.digest));

        let mut keys = try_join_all(rest.into_iter().map(|p| self.put(p))).await?;
        for payload in probe {
            keys.push(self.put(payload).await?);
        }
        Ok(keys)
    }

    async fn put(&self, payload: VariantPayload) -> PipelineResult<String> {
        let key = self.layout.key(&payload.variant);
        let request = PutRequest {
            key: key.clone(),
            content_type: payload.variant.encoding.content_type().to_string(),
            cache_control: self.cache_control.clone(),
            public_read: self.public_read,
            body: payload.bytes,
        };
        let size = request.body.len();

        self.retry
            .run(&key, || {
                let request = request.clone();
                let target = key.clone();
                async move {
                    match timeout(self.timeout, self.store.put(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(PipelineError::Timeout {
                            stage: Stage::Upload,
                            target,
                            timeout_ms: self.timeout.as_millis() as u64,
                        }),
                    }
                }
            })
            .await?;

        tracing::debug!(key = %key, bytes = size, "Uploaded to {}", self.store.name());
        Ok(key)
    }
}
