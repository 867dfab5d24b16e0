//! Engine configuration loaded from a TOML file in the app directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;

/// Name of the configuration file inside the app root.
pub const CONFIG_FILE_NAME: &str = "engine.toml";

const MAX_WORKERS: usize = 8;

fn default_workers() -> usize {
    3
}

fn default_point_count() -> usize {
    1_024
}

fn default_cache_entries() -> usize {
    64
}

pub(crate) fn clamp_workers(value: usize) -> usize {
    value.clamp(1, MAX_WORKERS)
}

/// Tunables for the waveform service and envelope requests.
///
/// Config keys (TOML): `workers`, `default_point_count`, `cache_entries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Concurrent waveform computations on the worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Output points for envelope requests that do not specify one.
    #[serde(default = "default_point_count")]
    pub default_point_count: usize,
    /// Upper bound on retained envelope cache entries.
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_point_count: default_point_count(),
            cache_entries: default_cache_entries(),
        }
    }
}

impl EngineConfig {
    /// Clamp every field into its supported range.
    pub fn normalized(mut self) -> Self {
        self.workers = clamp_workers(self.workers);
        self.default_point_count = self.default_point_count.max(1);
        self.cache_entries = self.cache_entries.max(1);
        self
    }
}

/// Errors that can occur while loading or saving the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to resolve or create the app directory.
    #[error(transparent)]
    Dir(#[from] app_dirs::AppDirError),
    /// Failed to read the config file.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the config file as TOML.
    #[error("Failed to parse config {path}: {source}")]
    ParseToml {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Failed to serialize the configuration.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// Failed to write the config file.
    #[error("Failed to write config {path}: {source}")]
    Write {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Resolve the config file path, creating the app directory if needed.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from the app directory, defaulting when missing.
pub fn load_or_default() -> Result<EngineConfig, ConfigError> {
    load_from(&config_path()?)
}

pub(crate) fn load_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EngineConfig =
        toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(config.normalized())
}

/// Persist the configuration to `path`.
pub fn save_to_path(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
