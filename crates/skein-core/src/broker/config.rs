use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level broker configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub storage: StorageConfig,
    pub lease: LeaseConfig,
    pub notify: NotifyConfig,
}

/// Where the RocksDB data directory lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Defaults applied when a caller leases without explicit durations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub default_lease_ms: u64,
    pub poll_max_wait_ms: u64,
    pub poll_interval_ms: u64,
}

/// Insert-notification channel settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Capacity of the broadcast channel. Slow subscribers that fall further
    /// behind than this miss notifications.
    pub channel_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("skein-data"),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: 30_000,
            poll_max_wait_ms: 5_000,
            poll_interval_ms: 100,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

impl LeaseConfig {
    pub fn poll_max_wait(&self) -> Duration {
        Duration::from_millis(self.poll_max_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BrokerConfig {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load the first candidate file that exists, or defaults when none does.
    pub fn discover<P: AsRef<Path>>(candidates: &[P]) -> Result<Self, ConfigError> {
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::default())
    }
}
