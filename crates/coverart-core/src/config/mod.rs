//! Configuration management for coverart.
//!
//! Configuration is loaded from the platform config directory (or an explicit
//! path) with sensible defaults. Secrets are never stored in the file directly:
//! values of the form `${VAR}` are resolved from the environment on use.

mod types;
mod validate;

pub use types::*;
pub(crate) use validate::is_valid_table_name;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for coverart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relational store settings
    pub database: DatabaseConfig,

    /// Object storage settings
    pub storage: StorageConfig,

    /// Resize and recompress settings
    pub transform: TransformConfig,

    /// Resource limits
    pub limits: LimitsConfig,

    /// Orchestration settings
    pub pipeline: PipelineConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.coverart.coverart/config.toml
    /// - Linux: ~/.config/coverart/config.toml
    ///
    /// Falls back to ~/.coverart/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "coverart", "coverart")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".coverart").join("config.toml")
            })
    }

    /// Resolved Postgres connection URL.
    pub fn database_url(&self) -> Result<String, ConfigError> {
        resolve_required(&self.database.url, "database.url")
    }

    /// Resolved `(key_id, key_secret)` storage credentials.
    pub fn storage_credentials(&self) -> Result<(String, String), ConfigError> {
        Ok((
            resolve_required(&self.storage.key_id, "storage.key_id")?,
            resolve_required(&self.storage.key_secret, "storage.key_secret")?,
        ))
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Resolve `${ENV_VAR}` references in config strings.
///
/// Plain strings pass through, empty strings and unset variables yield `None`.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok().filter(|v| !v.is_empty())
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_required(value: &str, field: &str) -> Result<String, ConfigError> {
    resolve_env_var(value).ok_or_else(|| ConfigError::MissingEnv {
        var: value
            .strip_prefix("${")
            .and_then(|v| v.strip_suffix('}'))
            .unwrap_or(value)
            .to_string(),
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.parallel_workers, 1);
        assert_eq!(config.transform.large_size, 520);
        assert_eq!(config.transform.small_size, 320);
        assert_eq!(config.transform.primary_format, PrimaryFormat::Png);
        assert_eq!(config.database.tables, vec!["podcasts", "podcast_episodes"]);
    }

    #[test]
    fn test_config_to_toml() {
        let config = Config::default();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[database]"));
        assert!(toml.contains("[storage]"));
        assert!(toml.contains("[transform]"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [storage]
            bucket = "artwork"

            [transform]
            primary_format = "jpeg"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.bucket, "artwork");
        assert_eq!(config.storage.namespace, "podcast-images");
        assert_eq!(config.transform.primary_format, PrimaryFormat::Jpeg);
        assert_eq!(config.transform.webp_quality, 80.0);
    }

    #[test]
    fn test_from_toml_runs_validation() {
        let err = Config::from_toml("[pipeline]\nparallel_workers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[limits]\nfetch_timeout_ms = 1500\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.limits.fetch_timeout_ms, 1500);
    }

    #[test]
    fn test_resolve_env_var() {
        // Non-env-var strings pass through
        assert_eq!(resolve_env_var("plain-key"), Some("plain-key".to_string()));
        // Empty returns None
        assert_eq!(resolve_env_var(""), None);
        // Unset env var returns None
        assert_eq!(resolve_env_var("${DEFINITELY_NOT_SET_XYZ_123}"), None);
    }

    #[test]
    fn test_missing_credentials_name_the_variable() {
        let mut config = Config::default();
        config.storage.key_id = "${COVERART_TEST_UNSET_KEY_ID}".to_string();
        let err = config.storage_credentials().unwrap_err();
        match err {
            ConfigError::MissingEnv { var, field } => {
                assert_eq!(var, "COVERART_TEST_UNSET_KEY_ID");
                assert_eq!(field, "storage.key_id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_literal_database_url() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/podcasts".to_string();
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/podcasts");
    }
}
