//! Error types for the coverart pipeline.
//!
//! Errors are organized by stage so a failed item can be logged with enough
//! context (URL, storage key, record id) to be replayed on the next run.

use std::fmt;
use thiserror::Error;

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// A `${VAR}` reference points at an unset environment variable
    #[error("Environment variable {var} is not set (required by {field})")]
    MissingEnv { var: String, field: String },
}

/// The pipeline stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Existence,
    Fetch,
    Decode,
    Transform,
    Upload,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Existence => "existence",
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Transform => "transform",
            Stage::Upload => "upload",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Pipeline processing errors, organized by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source image unreachable or answered with a non-2xx status
    #[error("Fetch failed for {url}: {message}")]
    Fetch {
        url: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Payload is not a decodable image
    #[error("Decode error for {url}: {message}")]
    Decode { url: String, message: String },

    /// Resize or recompress step failed
    #[error("Encode error for {variant}: {message}")]
    Encode { variant: String, message: String },

    /// Existence check or upload failed (not-found is never an error)
    #[error("Storage error for {key}: {message}")]
    Storage { key: String, message: String },

    /// Writing the digest/extension back to the record failed
    #[error("Commit failed for record {id}: {message}")]
    Commit { id: String, message: String },

    /// Reading the pending work set failed
    #[error("Pending query failed for {table}: {message}")]
    Query { table: String, message: String },

    /// A bounded step ran past its deadline
    #[error("Timeout in {stage} stage for {target} after {timeout_ms}ms")]
    Timeout {
        stage: Stage,
        target: String,
        timeout_ms: u64,
    },

    /// The database or storage connection itself is unusable
    #[error("Connection to {service} failed: {message}")]
    Connection { service: String, message: String },
}

impl PipelineError {
    /// Whether the error means the collaborator connection is gone, as opposed
    /// to a problem with one item.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, PipelineError::Connection { .. })
    }
}

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
