//! In-memory storage backend for testing.

use super::{ObjectStore, PutRequest};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory object store that records every call.
///
/// Objects live in a `HashMap` behind a [`RwLock`]. Failures can be injected
/// per key suffix so tests can exercise partial-publish and existence-check
/// error paths.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, PutRequest>>,
    exists_calls: AtomicUsize,
    put_calls: AtomicUsize,
    fail_put_suffix: Option<String>,
    fail_exists: Option<String>,
    put_delay: Option<Duration>,
}

impl MemoryStore {
    /// Create a store pre-populated with (empty) objects at the given keys.
    pub fn with_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let objects = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let request = PutRequest {
                    key: key.clone(),
                    body: Vec::new(),
                    content_type: "application/octet-stream".to_string(),
                    cache_control: String::new(),
                    public_read: false,
                };
                (key, request)
            })
            .collect();
        Self {
            objects: RwLock::new(objects),
            ..Self::default()
        }
    }

    /// Fail every put whose key ends with `suffix`.
    pub fn failing_puts(mut self, suffix: impl Into<String>) -> Self {
        self.fail_put_suffix = Some(suffix.into());
        self
    }

    /// Fail every existence check with a service error carrying `message`.
    pub fn failing_exists(mut self, message: impl Into<String>) -> Self {
        self.fail_exists = Some(message.into());
        self
    }

    /// Delay every put, to widen race windows in concurrency tests.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Keys currently stored, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn get(&self, key: &str) -> Option<PutRequest> {
        self.objects.read().await.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn exists(&self, key: &str) -> PipelineResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_exists {
            return Err(PipelineError::Storage {
                key: key.to_string(),
                message: message.clone(),
            });
        }
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn put(&self, request: PutRequest) -> PipelineResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(suffix) = &self.fail_put_suffix {
            if request.key.ends_with(suffix.as_str()) {
                return Err(PipelineError::Storage {
                    key: request.key,
                    message: "injected put failure".to_string(),
                });
            }
        }
        self.objects
            .write()
            .await
            .insert(request.key.clone(), request);
        Ok(())
    }
}
