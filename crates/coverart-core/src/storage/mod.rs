//! Object storage seam.
//!
//! The pipeline only ever needs two operations from storage: a metadata-only
//! existence probe and a whole-object put. Both are expressed by the
//! [`ObjectStore`] trait so the orchestrator can be driven against S3 in
//! production and an in-memory store in tests.

#[cfg(any(test, feature = "mock"))]
mod memory;
mod s3;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::MemoryStore;
pub use self::s3::S3Store;

use crate::error::PipelineResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Shared handle to a storage backend.
pub type StoreHandle = Arc<dyn ObjectStore>;

/// A single object write.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    /// Grant anonymous read access to the object
    pub public_read: bool,
}

/// Unified interface for object storage backends.
///
/// Uses `async_trait` because the orchestrator holds backends as
/// `Arc<dyn ObjectStore>`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Check whether an object exists without reading it.
    ///
    /// A missing object is `Ok(false)`. Every other failure (permissions,
    /// network, service errors) is an error.
    async fn exists(&self, key: &str) -> PipelineResult<bool>;

    /// Write an object, replacing any existing object at the same key.
    async fn put(&self, request: PutRequest) -> PipelineResult<()>;
}
