//! Command handlers.

pub mod config;
pub mod keys;
pub mod run;

use coverart_core::{Config, ConfigError};
use std::path::{Path, PathBuf};

/// The config file in effect: `--config` / `COVERART_CONFIG`, else the
/// platform default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path)
}

/// Load configuration. An explicit path must exist; the default path falls
/// back to built-in defaults when absent.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    match explicit {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}
