//! Existence cache in front of the storage probe.
//!
//! One existence answer per digest per run at most. Results (present or absent)
//! are memoized; failed lookups are not, so the next item sharing the digest
//! tries again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use futures_util::future::try_join_all;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{PipelineError, PipelineResult};
use crate::storage::StoreHandle;
use crate::types::KeyLayout;

use super::digest::Digest;

/// Memoized existence checks plus per-digest in-flight locks.
pub struct ExistenceChecker {
    store: StoreHandle,
    layout: KeyLayout,
    cache: Mutex<HashMap<Digest, bool>>,
    in_flight: Mutex<HashMap<Digest, Arc<AsyncMutex<()>>>>,
}

impl ExistenceChecker {
    pub fn new(store: StoreHandle, layout: KeyLayout) -> Self {
        Self {
            store,
            layout,
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the variants for `digest` are already published.
    ///
    /// Probes the small WebP key, the last variant written on publish.
    pub async fn exists(&self, digest: &Digest) -> PipelineResult<bool> {
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .copied();
        if let Some(hit) = cached {
            tracing::trace!(digest = %digest, present = hit, "Existence cache hit");
            return Ok(hit);
        }

        let present = self.lookup(digest).await?;

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest.clone(), present);
        Ok(present)
    }

    /// The probe alone decides absence. A present probe may come from a run
    /// with another primary format or size, so the rest of the current set
    /// is confirmed too.
    async fn lookup(&self, digest: &Digest) -> PipelineResult<bool> {
        let probe = self.layout.probe(digest);
        let probe_key = self.layout.key(&probe);
        if !self.store.exists(&probe_key).await? {
            tracing::debug!(key = %probe_key, "Probe absent in {}", self.store.name());
            return Ok(false);
        }

        let rest = self
            .layout
            .variants(digest)
            .into_iter()
            .filter(|variant| *variant != probe)
            .map(|variant| self.layout.key(&variant));
        let found = try_join_all(rest.map(|key| async move {
            let present = self.store.exists(&key).await?;
            Ok::<_, PipelineError>((key, present))
        }))
        .await?;

        let missing: Vec<&str> = found
            .iter()
            .filter(|(_, present)| !present)
            .map(|(key, _)| key.as_str())
            .collect();
        if !missing.is_empty() {
            tracing::debug!(
                digest = %digest,
                missing = ?missing,
                "Probe present but variant set incomplete"
            );
        }
        Ok(missing.is_empty())
    }

    /// Record that all variants for `digest` were just published.
    pub fn mark_present(&self, digest: &Digest) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest.clone(), true);
    }

    /// Serialize work on one digest. Hold the guard across
    /// check, transform, upload and [`mark_present`](Self::mark_present).
    pub async fn lock(&self, digest: &Digest) -> DigestGuard<'_> {
        let slot = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(digest.clone())
            .or_default()
            .clone();
        DigestGuard {
            checker: self,
            digest: digest.clone(),
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Number of digests currently locked or waited on.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of digests with a known answer.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive hold on one digest. The slot is dropped from the in-flight map
/// when the last holder or waiter lets go.
pub struct DigestGuard<'a> {
    checker: &'a ExistenceChecker,
    digest: Digest,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DigestGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut in_flight = self
            .checker
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Waiters hold a clone of the slot, so only the map's own reference
        // is left when nobody needs it
        if in_flight
            .get(&self.digest)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            in_flight.remove(&self.digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimaryFormat;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn digest() -> Digest {
        Digest::from_source_url("https://x/img.png?v=1")
    }

    #[tokio::test]
    async fn test_absent_is_false_and_cached() {
        let store = Arc::new(MemoryStore::default());
        let checker = ExistenceChecker::new(store.clone(), KeyLayout::default());
        assert!(!checker.exists(&digest()).await.unwrap());
        assert!(!checker.exists(&digest()).await.unwrap());
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn test_full_set_is_present() {
        let layout = KeyLayout::default();
        let keys = layout.variants(&digest()).map(|v| layout.key(&v));
        let store = Arc::new(MemoryStore::with_keys(keys));
        let checker = ExistenceChecker::new(store.clone(), layout);
        assert!(checker.exists(&digest()).await.unwrap());
        assert_eq!(store.exists_calls(), 4);
    }

    #[tokio::test]
    async fn test_small_webp_alone_is_not_present() {
        let layout = KeyLayout::default();
        let probe_key = layout.key(&layout.probe(&digest()));
        let store = Arc::new(MemoryStore::with_keys([probe_key]));
        let checker = ExistenceChecker::new(store, layout);
        assert!(!checker.exists(&digest()).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_from_another_primary_format_is_not_present() {
        let png = KeyLayout::default();
        let keys = png.variants(&digest()).map(|v| png.key(&v));
        let store = Arc::new(MemoryStore::with_keys(keys));
        let jpeg = KeyLayout {
            primary: PrimaryFormat::Jpeg,
            ..KeyLayout::default()
        };
        let checker = ExistenceChecker::new(store, jpeg);
        assert!(!checker.exists(&digest()).await.unwrap());
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let store = Arc::new(MemoryStore::default().failing_exists("access denied"));
        let checker = ExistenceChecker::new(store.clone(), KeyLayout::default());
        assert!(checker.exists(&digest()).await.is_err());
        assert!(checker.exists(&digest()).await.is_err());
        assert_eq!(store.exists_calls(), 2);
        assert_eq!(checker.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_mark_present_short_circuits_lookup() {
        let store = Arc::new(MemoryStore::default());
        let checker = ExistenceChecker::new(store.clone(), KeyLayout::default());
        assert!(!checker.exists(&digest()).await.unwrap());
        checker.mark_present(&digest());
        assert!(checker.exists(&digest()).await.unwrap());
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lock_serializes_same_digest() {
        let checker = Arc::new(ExistenceChecker::new(
            Arc::new(MemoryStore::default()),
            KeyLayout::default(),
        ));
        let guard = checker.lock(&digest()).await;

        let contender = {
            let checker = checker.clone();
            tokio::spawn(async move {
                let _guard = checker.lock(&digest()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different digest is not blocked
        let other = Digest::from_source_url("https://x/other.png");
        drop(checker.lock(&other).await);

        drop(guard);
        contender.await.unwrap();
        assert_eq!(checker.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let checker = ExistenceChecker::new(Arc::new(MemoryStore::default()), KeyLayout::default());
        for n in 0..10 {
            let digest = Digest::from_source_url(&format!("https://x/{n}.png"));
            let _guard = checker.lock(&digest).await;
            assert_eq!(checker.in_flight_len(), 1);
        }
        assert_eq!(checker.in_flight_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slot_survives_while_waited_on() {
        let checker = Arc::new(ExistenceChecker::new(
            Arc::new(MemoryStore::default()),
            KeyLayout::default(),
        ));
        let guard = checker.lock(&digest()).await;

        let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let contender = {
            let checker = checker.clone();
            tokio::spawn(async move {
                let _guard = checker.lock(&digest()).await;
                let _ = locked_tx.send(());
                let _ = release_rx.await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        locked_rx.await.unwrap();
        assert_eq!(checker.in_flight_len(), 1);

        release_tx.send(()).unwrap();
        contender.await.unwrap();
        assert_eq!(checker.in_flight_len(), 0);
    }
}
