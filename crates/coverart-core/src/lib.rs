//! Coverart Core - podcast artwork optimisation library.
//!
//! Finds records whose artwork has not been optimised yet, publishes four
//! resized and recompressed variants of each source image to object storage,
//! and writes the content digest back onto the record.
//!
//! # Architecture
//!
//! ```text
//! pending records → digest → exists? ─yes─────────────────────→ commit
//!                                    └no→ fetch → resize → compress → upload ┘
//! ```
//!
//! Variants are content-addressed by a digest of the source URL, so the same
//! artwork referenced from many records is fetched and stored once.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coverart_core::{Config, HttpSource, Pipeline, PgRecordStore, S3Store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let url = config.database_url()?;
//!     let pool = coverart_core::records::connect_pool(&config.database, &url).await?;
//!     let store = Arc::new(S3Store::from_config(&config).await?);
//!     let source = Arc::new(HttpSource::new(&config.limits)?);
//!     let pipeline = Pipeline::new(&config, store, source);
//!
//!     let records = PgRecordStore::connect(pool, "podcasts").await?;
//!     let summary = pipeline.run(&records).await?;
//!     println!("{} committed", summary.committed());
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod pipeline;
pub mod records;
pub mod storage;
pub mod types;

// Re-exports for convenient access
pub use config::Config;
pub use error::{ConfigError, PipelineError, PipelineResult, Stage};
pub use pipeline::{Digest, HttpSource, ImageSource, ItemOutcome, Pipeline};
pub use records::{PgRecordStore, RecordStore};
pub use storage::{ObjectStore, PutRequest, S3Store, StoreHandle};
pub use types::{KeyLayout, RunSummary, Variant, WorkItem};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
