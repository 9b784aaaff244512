//! In-memory record store for testing.

use super::RecordStore;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::digest::Digest;
use crate::types::WorkItem;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Metadata written back onto a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedImage {
    pub digest: String,
    pub extension: String,
}

/// Record store backed by a fixed list of work items.
pub struct MemoryRecords {
    table: String,
    items: Vec<WorkItem>,
    committed: Mutex<HashMap<String, CommittedImage>>,
    commit_calls: AtomicUsize,
    fail_pending: bool,
    fail_commits: HashSet<String>,
    lose_connection_on: Option<String>,
}

impl MemoryRecords {
    pub fn new(table: impl Into<String>, items: Vec<WorkItem>) -> Self {
        Self {
            table: table.into(),
            items,
            committed: Mutex::new(HashMap::new()),
            commit_calls: AtomicUsize::new(0),
            fail_pending: false,
            fail_commits: HashSet::new(),
            lose_connection_on: None,
        }
    }

    /// Make `pending()` fail with a connection error.
    pub fn failing_pending(mut self) -> Self {
        self.fail_pending = true;
        self
    }

    /// Reject commits for `id` as if the row had vanished.
    pub fn failing_commit(mut self, id: impl Into<String>) -> Self {
        self.fail_commits.insert(id.into());
        self
    }

    /// Report a lost connection when committing `id`.
    pub fn losing_connection_on(mut self, id: impl Into<String>) -> Self {
        self.lose_connection_on = Some(id.into());
        self
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn committed(&self, id: &str) -> Option<CommittedImage> {
        self.committed.lock().ok()?.get(id).cloned()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    fn name(&self) -> &str {
        &self.table
    }

    async fn pending(&self) -> PipelineResult<Vec<WorkItem>> {
        if self.fail_pending {
            return Err(PipelineError::Connection {
                service: "memory".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.items.clone())
    }

    async fn commit(&self, id: &str, digest: &Digest, extension: &str) -> PipelineResult<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        if self.lose_connection_on.as_deref() == Some(id) {
            return Err(PipelineError::Connection {
                service: "memory".to_string(),
                message: "connection reset".to_string(),
            });
        }
        if self.fail_commits.contains(id) || !self.items.iter().any(|item| item.id == id) {
            return Err(PipelineError::Commit {
                id: id.to_string(),
                message: "no row with this id".to_string(),
            });
        }

        let mut committed = self.committed.lock().map_err(|_| PipelineError::Commit {
            id: id.to_string(),
            message: "record lock poisoned".to_string(),
        })?;
        committed.insert(
            id.to_string(),
            CommittedImage {
                digest: digest.to_string(),
                extension: extension.to_string(),
            },
        );
        Ok(())
    }
}
