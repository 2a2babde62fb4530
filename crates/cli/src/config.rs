//! Configuration loading from breaklog.toml.

use relay::{RelayConfig, ReplayPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the ingestion listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Store locations.
    #[serde(default)]
    pub stores: StoresConfig,

    /// Relay tuning.
    #[serde(default)]
    pub relay: RelaySection,
}

/// Paths of the two SQLite stores.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoresConfig {
    #[serde(default = "default_primary")]
    pub primary: PathBuf,

    #[serde(default = "default_secondary")]
    pub secondary: PathBuf,
}

/// The `[relay]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Records held in memory while a store is down.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Upper bound on each probe and insert.
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,

    /// Replay only what each store still owes, keeping failed records for
    /// later passes. Off means every pass drains the whole buffer once.
    #[serde(default)]
    pub replay_retry: bool,

    /// Replay attempts per record when `replay_retry` is on.
    #[serde(default = "default_replay_attempts")]
    pub replay_attempts: u32,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Largest accepted frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            probe_interval_secs: default_probe_interval_secs(),
            store_timeout_secs: default_store_timeout_secs(),
            replay_retry: false,
            replay_attempts: default_replay_attempts(),
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_primary() -> PathBuf {
    PathBuf::from("primary.db")
}

fn default_secondary() -> PathBuf {
    PathBuf::from("secondary.db")
}

fn default_buffer_capacity() -> usize {
    RelayConfig::default().buffer_capacity
}

fn default_probe_interval_secs() -> u64 {
    RelayConfig::default().probe_interval.as_secs()
}

fn default_store_timeout_secs() -> u64 {
    RelayConfig::default().store_timeout.as_secs()
}

fn default_replay_attempts() -> u32 {
    3
}

fn default_max_connections() -> usize {
    RelayConfig::default().max_connections
}

fn default_max_frame_size() -> usize {
    RelayConfig::default().max_frame_size
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration.
    pub fn default_config() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            stores: StoresConfig::default(),
            relay: RelaySection::default(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let relay = &self.relay;
        let checks = [
            ("relay.buffer_capacity", relay.buffer_capacity == 0),
            ("relay.probe_interval_secs", relay.probe_interval_secs == 0),
            ("relay.store_timeout_secs", relay.store_timeout_secs == 0),
            ("relay.replay_attempts", relay.replay_attempts == 0),
            ("relay.max_connections", relay.max_connections == 0),
            ("relay.max_frame_size", relay.max_frame_size == 0),
        ];

        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::Invalid(format!(
                "{field} must be greater than 0"
            ))),
            None => Ok(()),
        }
    }

    /// The relay tuning this configuration describes.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            buffer_capacity: self.relay.buffer_capacity,
            probe_interval: Duration::from_secs(self.relay.probe_interval_secs),
            store_timeout: Duration::from_secs(self.relay.store_timeout_secs),
            replay: if self.relay.replay_retry {
                ReplayPolicy::Retry {
                    max_attempts: self.relay.replay_attempts,
                }
            } else {
                ReplayPolicy::Drain
            },
            max_connections: self.relay.max_connections,
            max_frame_size: self.relay.max_frame_size,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}
