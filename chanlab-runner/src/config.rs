//! Loading analysis configuration from disk.

use std::fs;
use std::path::{Path, PathBuf};

use chanlab_core::{ChanConfig, ConfigError, Period};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
}

/// Read and validate a TOML config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ChanConfig, ConfigLoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = ChanConfig::from_toml(&content).map_err(|source| ConfigLoadError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Parse a comma separated period list such as `day,30m`.
pub fn parse_periods(value: &str) -> Result<Vec<Period>, ConfigError> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}
