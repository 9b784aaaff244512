//! Sub-configuration structs with defaults matching the production deployment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL (`${VAR}` is resolved from the environment)
    pub url: String,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// How long to wait for a pooled connection before giving up
    pub acquire_timeout_ms: u64,

    /// Tables holding an `image` JSONB column, processed in order
    pub tables: Vec<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "${DATABASE_URL}".to_string(),
            max_connections: 5,
            acquire_timeout_ms: 10_000,
            tables: vec!["podcasts".to_string(), "podcast_episodes".to_string()],
        }
    }
}

/// Object storage settings (any S3-compatible service).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket receiving the optimised variants
    pub bucket: String,

    /// Key prefix for every variant (`<namespace>/<digest>--<width>w.<ext>`)
    pub namespace: String,

    /// Provider region
    pub region: String,

    /// Custom endpoint for non-AWS services
    pub endpoint: Option<String>,

    /// Access key id (`${VAR}` is resolved from the environment)
    pub key_id: String,

    /// Secret access key (`${VAR}` is resolved from the environment)
    pub key_secret: String,

    /// Cache-Control header written on every variant
    pub cache_control: String,

    /// Mark uploaded variants as publicly readable
    pub public_read: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "fancast".to_string(),
            namespace: "podcast-images".to_string(),
            region: "ams3".to_string(),
            endpoint: Some("https://ams3.digitaloceanspaces.com".to_string()),
            key_id: "${SPACES_KEY_ID}".to_string(),
            key_secret: "${SPACES_SECRET_KEY}".to_string(),
            cache_control: "public, max-age=31536000, immutable".to_string(),
            public_read: true,
        }
    }
}

/// Final encoding used for the non-WebP pair of variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryFormat {
    #[default]
    Png,
    Jpeg,
}

impl PrimaryFormat {
    /// File extension (without the dot) stored on the record.
    pub fn extension(self) -> &'static str {
        match self {
            PrimaryFormat::Png => "png",
            PrimaryFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            PrimaryFormat::Png => "image/png",
            PrimaryFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for PrimaryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryFormat::Png => write!(f, "png"),
            PrimaryFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// Resize and recompress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Longest edge of the large variant in pixels
    pub large_size: u32,

    /// Longest edge of the small variant in pixels
    pub small_size: u32,

    /// Encoding of the primary variants
    pub primary_format: PrimaryFormat,

    /// JPEG quality (1-100), used when `primary_format = "jpeg"`
    pub jpeg_quality: u8,

    /// Palette quantizer sampling for PNG (1-30, 1 is slowest and most accurate)
    pub png_sample_factor: i32,

    /// Lossy WebP quality (0-100)
    pub webp_quality: f32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            large_size: 520,
            small_size: 320,
            primary_format: PrimaryFormat::Png,
            jpeg_quality: 90,
            png_sample_factor: 10,
            webp_quality: 80.0,
        }
    }
}

/// Resource limits to protect against problematic sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum source payload size in megabytes
    pub max_source_size_mb: u64,

    /// Maximum decoded image dimension (width or height)
    pub max_image_dimension: u32,

    /// Source fetch timeout in milliseconds
    pub fetch_timeout_ms: u64,

    /// Decode timeout in milliseconds
    pub decode_timeout_ms: u64,

    /// Per-variant upload timeout in milliseconds
    pub upload_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_source_size_mb: 20,
            max_image_dimension: 10000,
            fetch_timeout_ms: 30_000,
            decode_timeout_ms: 5000,
            upload_timeout_ms: 30_000,
        }
    }
}

impl LimitsConfig {
    pub fn max_source_bytes(&self) -> u64 {
        self.max_source_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Items processed concurrently (1 = strictly sequential)
    pub parallel_workers: usize,

    /// Retries for transient fetch/upload failures, also the S3 SDK retry
    /// count (0 = rely on the next run)
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    pub retry_delay_ms: u64,

    /// Stop scheduling items once the database or storage connection fails
    pub abort_on_connection_error: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 1,
            retry_attempts: 0,
            retry_delay_ms: 1000,
            abort_on_connection_error: true,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,

    /// Log format (pretty, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
