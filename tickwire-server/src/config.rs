//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TICKWIRE_CONFIG or --config)
//! 3. Environment variables

use crate::server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tickwire_protocol::{DEFAULT_MAX_PAYLOAD_SIZE, DEFAULT_PORT};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network and protocol configuration.
    pub network: NetworkConfig,
    /// Settings for the standalone host loop.
    pub host: HostConfig,
}

impl Config {
    /// Loads configuration from an optional file, then applies environment
    /// variable overrides and validates the result.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&lookup);
        self.host.apply_overrides(&lookup);
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.host.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// What to do with a second client while one is already connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtraPeerPolicy {
    /// Leave it in the listen backlog until the active client goes away.
    #[default]
    Queue,
    /// Accept and immediately close it.
    Refuse,
}

impl ExtraPeerPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queue" => Some(ExtraPeerPolicy::Queue),
            "refuse" => Some(ExtraPeerPolicy::Refuse),
            _ => None,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum bytes taken from the socket per non-blocking read.
    pub read_chunk_size: usize,
    /// Per-read timeout while holding, in milliseconds.
    pub hold_read_timeout_ms: u64,
    /// Largest frame payload accepted from a client.
    pub max_frame_size: u32,
    /// Handling of concurrent connection attempts.
    pub extra_peers: ExtraPeerPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            read_chunk_size: 4096,
            hold_read_timeout_ms: 100,
            max_frame_size: DEFAULT_MAX_PAYLOAD_SIZE,
            extra_peers: ExtraPeerPolicy::Queue,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("TICKWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(size) = lookup("TICKWIRE_READ_CHUNK") {
            if let Ok(n) = size.parse() {
                self.read_chunk_size = n;
            }
        }

        if let Some(timeout) = lookup("TICKWIRE_HOLD_READ_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.hold_read_timeout_ms = ms;
            }
        }

        if let Some(max) = lookup("TICKWIRE_MAX_FRAME") {
            if let Ok(n) = max.parse() {
                self.max_frame_size = n;
            }
        }

        if let Some(policy) = lookup("TICKWIRE_EXTRA_PEERS") {
            if let Some(parsed) = ExtraPeerPolicy::parse(&policy) {
                self.extra_peers = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "network.read_chunk_size must be greater than 0".to_string(),
            ));
        }
        // A zero timeout means "block forever" to the OS.
        if self.hold_read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "network.hold_read_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the hold read timeout as Duration.
    pub fn hold_read_timeout(&self) -> Duration {
        Duration::from_millis(self.hold_read_timeout_ms)
    }

    /// Builds the runtime server configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(self.bind_addr)
            .with_read_chunk_size(self.read_chunk_size)
            .with_hold_read_timeout(self.hold_read_timeout())
            .with_max_frame_size(self.max_frame_size)
            .with_extra_peers(self.extra_peers)
    }
}

/// Standalone host loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Delay between two ticks, in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30,
        }
    }
}

impl HostConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(interval) = lookup("TICKWIRE_TICK_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.tick_interval_ms = ms;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "host.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the tick interval as Duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
