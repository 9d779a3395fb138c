//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable overriding [`SyncConfig::recheck_interval`], in seconds.
pub const RECHECK_INTERVAL_ENV: &str = "REVCACHE_RECHECK_INTERVAL_SECS";

/// Synchronization settings for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum spacing between two staleness checks against the store.
    ///
    /// Reads inside this window are answered from the local snapshot
    /// without any store traffic. Zero checks on every read.
    pub recheck_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recheck_interval: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Create a new sync config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recheck interval.
    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    /// Build a config from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(RECHECK_INTERVAL_ENV) {
            let secs = raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: RECHECK_INTERVAL_ENV.to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
            config.recheck_interval = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // A chrono::Duration must be able to represent the interval.
        if chrono::Duration::from_std(self.recheck_interval).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "recheck_interval".to_string(),
                value: format!("{:?}", self.recheck_interval),
                reason: "out of range".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for an LMDB-backed shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdbStoreConfig {
    /// Directory holding the LMDB environment. Processes sharing datasets
    /// must point at the same directory.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
}

impl LmdbStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: 64,
        }
    }

    /// Set the map size.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "path".to_string(),
            });
        }
        if self.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.map_size_mb.checked_mul(1024 * 1024).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "map size in bytes overflows usize".to_string(),
            });
        }
        Ok(())
    }
}
