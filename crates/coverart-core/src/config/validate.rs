//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.parallel_workers == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.parallel_workers must be > 0".into(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be > 0".into(),
            ));
        }
        if self.database.tables.is_empty() {
            return Err(ConfigError::ValidationError(
                "database.tables must list at least one table".into(),
            ));
        }
        if let Some(bad) = self
            .database
            .tables
            .iter()
            .find(|t| !is_valid_table_name(t))
        {
            return Err(ConfigError::ValidationError(format!(
                "database.tables contains an invalid table name: {bad:?}"
            )));
        }
        if self.storage.bucket.is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.bucket must not be empty".into(),
            ));
        }
        if self.transform.small_size == 0 {
            return Err(ConfigError::ValidationError(
                "transform.small_size must be > 0".into(),
            ));
        }
        if self.transform.large_size <= self.transform.small_size {
            return Err(ConfigError::ValidationError(
                "transform.large_size must be greater than transform.small_size".into(),
            ));
        }
        if self.transform.jpeg_quality == 0 || self.transform.jpeg_quality > 100 {
            return Err(ConfigError::ValidationError(
                "transform.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        if !(1..=30).contains(&self.transform.png_sample_factor) {
            return Err(ConfigError::ValidationError(
                "transform.png_sample_factor must be between 1 and 30".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.transform.webp_quality) {
            return Err(ConfigError::ValidationError(
                "transform.webp_quality must be between 0 and 100".into(),
            ));
        }
        if self.limits.max_source_size_mb == 0 || self.limits.max_source_size_mb > 1024 {
            return Err(ConfigError::ValidationError(
                "limits.max_source_size_mb must be between 1 and 1024".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.limits.fetch_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.fetch_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.decode_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.decode_timeout_ms must be > 0".into(),
            ));
        }
        if self.limits.upload_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "limits.upload_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
