//! Artwork optimisation pipeline components.
//!
//! This module contains all the stages of the pipeline:
//! - **digest**: Content keys derived from source URLs
//! - **existence**: Memoized storage probe and per-digest locks
//! - **fetch**: Download source artwork
//! - **decode**: Decode payloads with limits and timeout
//! - **transform**: Resize to lossless intermediates, then recompress
//! - **upload**: Publish the four variants
//! - **retry**: Backoff for transient failures
//! - **processor**: Orchestrates the full pipeline

pub mod decode;
pub mod digest;
pub mod existence;
pub mod fetch;
pub mod processor;
pub mod retry;
pub mod transform;
pub mod upload;

// Re-exports for convenient access
pub use decode::{DecodedImage, ImageDecoder};
pub use digest::{Digest, DIGEST_LEN};
pub use existence::{DigestGuard, ExistenceChecker};
#[cfg(any(test, feature = "mock"))]
pub use fetch::StaticSource;
pub use fetch::{HttpSource, ImageSource};
pub use processor::{ItemOutcome, Pipeline};
pub use retry::RetryPolicy;
pub use transform::Transformer;
pub use upload::Uploader;
