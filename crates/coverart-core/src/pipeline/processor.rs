//! Pipeline orchestration - wires together all processing stages.
//!
//! Per item: digest → existence → (transform → upload) → commit. Failures are
//! confined to the item that raised them; only connection-level failures stop
//! the run.

use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, PipelineConfig};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::records::RecordStore;
use crate::storage::StoreHandle;
use crate::types::{KeyLayout, RunSummary, WorkItem};

use super::digest::Digest;
use super::existence::ExistenceChecker;
use super::fetch::ImageSource;
use super::transform::Transformer;
use super::upload::Uploader;

/// Terminal state of one work item.
#[derive(Debug)]
pub enum ItemOutcome {
    /// Transformed, uploaded and committed
    Published,
    /// Variants were already in storage; committed without a transform
    AlreadyPresent,
    /// Gave up at `stage`; the record is left pending for the next run
    Failed { stage: Stage, error: PipelineError },
    /// Not attempted because the run was aborted
    Skipped,
}

impl ItemOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, ItemOutcome::Published | ItemOutcome::AlreadyPresent)
    }
}

/// The artwork pipeline. One instance serves every table of a run so the
/// existence cache is shared between them.
pub struct Pipeline {
    existence: ExistenceChecker,
    transformer: Transformer,
    uploader: Uploader,
    layout: KeyLayout,
    options: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: &Config, store: StoreHandle, source: Arc<dyn ImageSource>) -> Self {
        let layout = KeyLayout::from_config(config);
        Self {
            existence: ExistenceChecker::new(store.clone(), layout.clone()),
            transformer: Transformer::new(config, source),
            uploader: Uploader::new(config, store),
            layout,
            options: config.pipeline.clone(),
        }
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Run one item to a terminal state. Never panics on item errors; the
    /// failure is logged and returned as [`ItemOutcome::Failed`].
    pub async fn process_item(&self, records: &dyn RecordStore, item: &WorkItem) -> ItemOutcome {
        let digest = Digest::from_source_url(&item.source_url);
        let outcome = match self.publish(item, &digest).await {
            Ok(published) => match records
                .commit(&item.id, &digest, self.layout.record_extension())
                .await
            {
                Ok(()) if published => ItemOutcome::Published,
                Ok(()) => ItemOutcome::AlreadyPresent,
                Err(error) => ItemOutcome::Failed {
                    stage: Stage::Commit,
                    error,
                },
            },
            Err((stage, error)) => ItemOutcome::Failed { stage, error },
        };

        match &outcome {
            ItemOutcome::Published => {
                tracing::info!(table = records.name(), id = %item.id, digest = %digest, "Published")
            }
            ItemOutcome::AlreadyPresent => {
                tracing::info!(
                    table = records.name(),
                    id = %item.id,
                    digest = %digest,
                    "Already present"
                )
            }
            ItemOutcome::Failed { stage, error } => tracing::warn!(
                table = records.name(),
                id = %item.id,
                digest = %digest,
                stage = %stage,
                "Item failed: {error}"
            ),
            ItemOutcome::Skipped => {}
        }
        outcome
    }

    /// Make sure all variants for `digest` exist. `Ok(true)` when this call
    /// published them, `Ok(false)` when they were already there.
    async fn publish(
        &self,
        item: &WorkItem,
        digest: &Digest,
    ) -> Result<bool, (Stage, PipelineError)> {
        let _guard = self.existence.lock(digest).await;

        if self
            .existence
            .exists(digest)
            .await
            .map_err(|e| (Stage::Existence, e))?
        {
            return Ok(false);
        }

        let payloads = self
            .transformer
            .transform(&item.source_url, digest)
            .await
            .map_err(|e| (transform_stage(&e), e))?;

        self.uploader
            .upload(payloads)
            .await
            .map_err(|e| (Stage::Upload, e))?;

        self.existence.mark_present(digest);
        Ok(true)
    }

    /// Load the pending set from `records` and process it.
    pub async fn run(&self, records: &dyn RecordStore) -> PipelineResult<RunSummary> {
        let items = records.pending().await?;
        Ok(self.process_items(records, items, |_, _| {}).await)
    }

    /// Process `items` with at most `parallel_workers` in flight, calling
    /// `on_item` as each one reaches a terminal state.
    pub async fn process_items<F>(
        &self,
        records: &dyn RecordStore,
        items: Vec<WorkItem>,
        on_item: F,
    ) -> RunSummary
    where
        F: Fn(&WorkItem, &ItemOutcome) + Sync,
    {
        let start = Instant::now();
        let aborted = AtomicBool::new(false);
        let workers = self.options.parallel_workers.max(1);

        tracing::info!(
            table = records.name(),
            items = items.len(),
            workers,
            "Processing pending records"
        );

        let outcomes: Vec<ItemOutcome> = stream::iter(items.iter())
            .map(|item| {
                let aborted = &aborted;
                let on_item = &on_item;
                async move {
                    let outcome = if aborted.load(Ordering::SeqCst) {
                        ItemOutcome::Skipped
                    } else {
                        self.process_item(records, item).await
                    };
                    if let ItemOutcome::Failed { error, .. } = &outcome {
                        if self.options.abort_on_connection_error && error.is_connection_level() {
                            if !aborted.swap(true, Ordering::SeqCst) {
                                tracing::error!(
                                    table = records.name(),
                                    "Connection lost, aborting run: {error}"
                                );
                            }
                        }
                    }
                    on_item(item, &outcome);
                    outcome
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut summary = RunSummary {
            table: records.name().to_string(),
            total: items.len(),
            aborted: aborted.load(Ordering::SeqCst),
            ..RunSummary::default()
        };
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Published => summary.published += 1,
                ItemOutcome::AlreadyPresent => summary.already_present += 1,
                ItemOutcome::Failed { .. } => summary.failed += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary.elapsed = start.elapsed();

        tracing::info!(
            table = %summary.table,
            published = summary.published,
            already_present = summary.already_present,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run finished in {:?}",
            summary.elapsed
        );
        summary
    }
}

fn transform_stage(error: &PipelineError) -> Stage {
    match error {
        PipelineError::Fetch { .. } => Stage::Fetch,
        PipelineError::Decode { .. } => Stage::Decode,
        PipelineError::Timeout { stage, .. } => *stage,
        _ => Stage::Transform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimaryFormat;
    use crate::pipeline::fetch::StaticSource;
    use crate::records::{CommittedImage, MemoryRecords};
    use crate::storage::MemoryStore;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::time::Duration;

    const URL: &str = "https://x/img.png?v=1";

    fn source_png() -> Vec<u8> {
        let img = ImageBuffer::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90u8]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn pipeline(config: &Config, store: &Arc<MemoryStore>, source: &Arc<StaticSource>) -> Pipeline {
        Pipeline::new(config, store.clone(), source.clone())
    }

    fn expected_keys(digest: &Digest) -> Vec<String> {
        let mut keys = vec![
            format!("podcast-images/{digest}--320w.png"),
            format!("podcast-images/{digest}--320w.webp"),
            format!("podcast-images/{digest}--520w.png"),
            format!("podcast-images/{digest}--520w.webp"),
        ];
        keys.sort();
        keys
    }

    fn committed_png(digest: &Digest) -> Option<CommittedImage> {
        Some(CommittedImage {
            digest: digest.to_string(),
            extension: "png".to_string(),
        })
    }

    #[tokio::test]
    async fn test_new_source_is_published_and_committed() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);
        let digest = Digest::from_source_url(URL);

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert_eq!(summary.published, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(source.fetch_calls(), 1);
        assert_eq!(store.put_calls(), 4);
        assert_eq!(store.keys().await, expected_keys(&digest));
        assert_eq!(records.committed("7"), committed_png(&digest));
    }

    #[tokio::test]
    async fn test_existing_variants_skip_transform_but_commit() {
        let digest = Digest::from_source_url(URL);
        let layout = KeyLayout::default();
        let keys = layout.variants(&digest).map(|v| layout.key(&v));
        let store = Arc::new(MemoryStore::with_keys(keys));
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert_eq!(summary.already_present, 1);
        assert_eq!(source.fetch_calls(), 0);
        assert_eq!(store.put_calls(), 0);
        assert_eq!(records.committed("7"), committed_png(&digest));
    }

    #[tokio::test]
    async fn test_incomplete_set_is_republished() {
        let digest = Digest::from_source_url(URL);
        let layout = KeyLayout::default();
        let store = Arc::new(MemoryStore::with_keys([layout.key(&layout.probe(&digest))]));
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert_eq!(summary.published, 1);
        assert_eq!(store.keys().await, expected_keys(&digest));
    }

    #[tokio::test]
    async fn test_primary_format_change_publishes_new_variants() {
        let digest = Digest::from_source_url(URL);
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));

        let first = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);
        pipeline(&Config::default(), &store, &source)
            .run(&first)
            .await
            .unwrap();

        let mut jpeg = Config::default();
        jpeg.transform.primary_format = PrimaryFormat::Jpeg;
        let second = MemoryRecords::new("podcasts", vec![WorkItem::new("8", URL)]);
        let summary = pipeline(&jpeg, &store, &source)
            .run(&second)
            .await
            .unwrap();

        assert_eq!(summary.published, 1);
        assert_eq!(summary.already_present, 0);
        let keys = store.keys().await;
        assert!(keys.contains(&format!("podcast-images/{digest}--520w.jpg")));
        assert!(keys.contains(&format!("podcast-images/{digest}--320w.jpg")));
        assert_eq!(
            second.committed("8"),
            Some(CommittedImage {
                digest: digest.to_string(),
                extension: "jpg".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_large_size_change_publishes_new_variants() {
        let digest = Digest::from_source_url(URL);
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));

        let first = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);
        pipeline(&Config::default(), &store, &source)
            .run(&first)
            .await
            .unwrap();

        let mut wider = Config::default();
        wider.transform.large_size = 640;
        let second = MemoryRecords::new("podcasts", vec![WorkItem::new("8", URL)]);
        let summary = pipeline(&wider, &store, &source)
            .run(&second)
            .await
            .unwrap();

        assert_eq!(summary.published, 1);
        let keys = store.keys().await;
        assert!(keys.contains(&format!("podcast-images/{digest}--640w.png")));
        assert!(keys.contains(&format!("podcast-images/{digest}--640w.webp")));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let other = "https://x/other.png";
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(
            StaticSource::default()
                .with_status(URL, 404)
                .with_body(other, source_png()),
        );
        let records = MemoryRecords::new(
            "podcasts",
            vec![WorkItem::new("7", URL), WorkItem::new("8", other)],
        );
        let p = pipeline(&Config::default(), &store, &source);

        let outcome = p.process_item(&records, &WorkItem::new("7", URL)).await;
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                stage: Stage::Fetch,
                ..
            }
        ));

        let summary = p.run(&records).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.published, 1);
        assert!(records.committed("7").is_none());
        assert_eq!(
            records.committed("8"),
            committed_png(&Digest::from_source_url(other))
        );
    }

    #[tokio::test]
    async fn test_shared_url_probes_storage_once() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new(
            "podcast_episodes",
            vec![WorkItem::new("1", URL), WorkItem::new("2", URL)],
        );

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert_eq!(store.exists_calls(), 1);
        assert_eq!(source.fetch_calls(), 1);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.already_present, 1);
        assert_eq!(records.committed("1"), records.committed("2"));
    }

    #[tokio::test]
    async fn test_cache_is_shared_across_tables() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let podcasts = MemoryRecords::new("podcasts", vec![WorkItem::new("1", URL)]);
        let episodes = MemoryRecords::new("podcast_episodes", vec![WorkItem::new("10", URL)]);
        let p = pipeline(&Config::default(), &store, &source);

        assert_eq!(p.run(&podcasts).await.unwrap().published, 1);
        assert_eq!(p.run(&episodes).await.unwrap().already_present, 1);
        assert_eq!(store.exists_calls(), 1);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_record_pending() {
        let store = Arc::new(MemoryStore::default().failing_puts("--520w.webp"));
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);
        let p = pipeline(&Config::default(), &store, &source);

        let outcome = p.process_item(&records, &WorkItem::new("7", URL)).await;
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                stage: Stage::Upload,
                ..
            }
        ));
        assert_eq!(records.commit_calls(), 0);

        // Next run sees no probe object and tries again
        let retry = pipeline(&Config::default(), &store, &source);
        retry.run(&records).await.unwrap();
        assert_eq!(source.fetch_calls(), 2);
        assert_eq!(records.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_source_fails_in_decode() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, b"<html>".to_vec()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        let outcome = pipeline(&Config::default(), &store, &source)
            .process_item(&records, &WorkItem::new("7", URL))
            .await;
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                stage: Stage::Decode,
                ..
            }
        ));
        assert_eq!(store.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_existence_error_is_not_treated_as_absent() {
        let store = Arc::new(MemoryStore::default().failing_exists("403 Forbidden"));
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        let outcome = pipeline(&Config::default(), &store, &source)
            .process_item(&records, &WorkItem::new("7", URL))
            .await;
        assert!(matches!(
            outcome,
            ItemOutcome::Failed {
                stage: Stage::Existence,
                ..
            }
        ));
        assert_eq!(source.fetch_calls(), 0);
        assert_eq!(records.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records =
            MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]).failing_commit("7");

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!summary.aborted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parallel_items_with_same_digest_transform_once() {
        let mut config = Config::default();
        config.pipeline.parallel_workers = 4;
        let store = Arc::new(MemoryStore::default().with_put_delay(Duration::from_millis(20)));
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let items = (0..4).map(|i| WorkItem::new(i.to_string(), URL)).collect();
        let records = MemoryRecords::new("podcast_episodes", items);

        let summary = pipeline(&config, &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert_eq!(source.fetch_calls(), 1);
        assert_eq!(store.put_calls(), 4);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.already_present, 3);
        assert_eq!(records.committed_count(), 4);
    }

    #[tokio::test]
    async fn test_connection_loss_aborts_remaining_items() {
        let urls = ["https://x/1.png", "https://x/2.png", "https://x/3.png"];
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(
            urls.iter()
                .fold(StaticSource::default(), |s, url| s.with_body(*url, source_png())),
        );
        let items = urls
            .iter()
            .enumerate()
            .map(|(i, url)| WorkItem::new((i + 1).to_string(), *url))
            .collect();
        let records = MemoryRecords::new("podcasts", items).losing_connection_on("1");

        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(source.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_without_abort_continues() {
        let mut config = Config::default();
        config.pipeline.abort_on_connection_error = false;
        let other = "https://x/other.png";
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(
            StaticSource::default()
                .with_body(URL, source_png())
                .with_body(other, source_png()),
        );
        let records = MemoryRecords::new(
            "podcasts",
            vec![WorkItem::new("1", URL), WorkItem::new("2", other)],
        )
        .losing_connection_on("1");

        let summary = pipeline(&config, &store, &source)
            .run(&records)
            .await
            .unwrap();
        assert!(!summary.aborted);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.published, 1);
    }

    #[tokio::test]
    async fn test_pending_query_failure_is_returned() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default());
        let records = MemoryRecords::new("podcasts", vec![]).failing_pending();

        let result = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await;
        assert!(result.unwrap_err().is_connection_level());
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_retried_when_enabled() {
        let mut config = Config::default();
        config.pipeline.retry_attempts = 2;
        config.pipeline.retry_delay_ms = 1;
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(
            StaticSource::default()
                .with_body(URL, source_png())
                .with_transient_failures(1),
        );
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        let summary = pipeline(&config, &store, &source)
            .run(&records)
            .await
            .unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(source.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let source = Arc::new(StaticSource::default().with_body(URL, source_png()));
        let records = MemoryRecords::new("podcasts", vec![WorkItem::new("7", URL)]);

        pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();
        let first = store.keys().await;

        // A fresh run has an empty cache and finds the published probe
        let summary = pipeline(&Config::default(), &store, &source)
            .run(&records)
            .await
            .unwrap();
        assert_eq!(summary.already_present, 1);
        assert_eq!(store.keys().await, first);
        assert_eq!(source.fetch_calls(), 1);
    }
}
