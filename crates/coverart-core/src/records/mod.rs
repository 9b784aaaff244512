//! Record store seam.
//!
//! A record store owns one table of podcast or episode rows. It yields the
//! pending work set and persists the digest and extension back once the
//! variants are known to be published.

#[cfg(any(test, feature = "mock"))]
mod memory;
mod postgres;

#[cfg(any(test, feature = "mock"))]
pub use self::memory::{CommittedImage, MemoryRecords};
pub use self::postgres::{connect_pool, PgRecordStore};

use crate::error::PipelineResult;
use crate::pipeline::digest::Digest;
use crate::types::WorkItem;
use async_trait::async_trait;

/// Source of pending work and sink for committed image metadata.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Table name, used for logging and summaries.
    fn name(&self) -> &str;

    /// Records with a source URL but no optimised metadata yet.
    async fn pending(&self) -> PipelineResult<Vec<WorkItem>>;

    /// Persist `digest` and `extension` (without the dot) onto record `id`.
    ///
    /// Both fields are written together; a record never carries one without
    /// the other. An unknown id is an error.
    async fn commit(&self, id: &str, digest: &Digest, extension: &str) -> PipelineResult<()>;
}
