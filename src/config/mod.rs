//! Configuration management for BlueSync
//!
//! This module handles loading, validating, and managing configuration
//! for the BlueSync service.

use crate::transport::{ServiceId, TransportConfig, DEFAULT_SERVICE_ID};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV_VAR: &str = "BLUESYNC_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to write TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name this device presents to peers
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Service identifier shared by both peers
    #[serde(default = "default_service_id")]
    pub service_id: ServiceId,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Link settings
    #[serde(default)]
    pub transport: TransportSettings,

    /// Clipboard polling settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Known devices
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Persisted settings location
    #[serde(default)]
    pub settings: SettingsLocation,
}

/// Link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Address the listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Dial timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Chunk size for payload transfer in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Largest frame sent or accepted in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Sync loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Clipboard polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Forward local clipboard changes
    #[serde(default = "default_sync_enabled")]
    pub enabled: bool,
}

/// Device discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// How long a device scan may take
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,

    /// Devices reachable from this machine
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// A device listed in the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,

    /// Whether the device is already paired
    #[serde(default)]
    pub paired: bool,

    /// PIN to try first when pairing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
}

/// Where the last-device settings live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsLocation {
    #[serde(default = "default_settings_path")]
    pub path: PathBuf,
}

// Default value functions
fn default_device_name() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn default_service_id() -> ServiceId {
    DEFAULT_SERVICE_ID
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8485".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    crate::transport::DEFAULT_CHUNK_SIZE
}

fn default_max_frame_size() -> usize {
    crate::MAX_FRAME_SIZE
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_sync_enabled() -> bool {
    true
}

fn default_scan_timeout_secs() -> u64 {
    10
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("~/.local/share/bluesync/settings.json")
}

// Default implementations
impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            connect_timeout_secs: default_connect_timeout_secs(),
            chunk_size: default_chunk_size(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            enabled: default_sync_enabled(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: default_scan_timeout_secs(),
            devices: Vec::new(),
        }
    }
}

impl Default for SettingsLocation {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            service_id: default_service_id(),
            log_level: default_log_level(),
            transport: TransportSettings::default(),
            sync: SyncSettings::default(),
            discovery: DiscoverySettings::default(),
            settings: SettingsLocation::default(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Checks in order:
    /// 1. Path from BLUESYNC_CONFIG environment variable
    /// 2. ~/.config/bluesync/config.toml
    /// 3. Defaults if neither exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration with an optional explicit path
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate_config()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bluesync").join("config.toml"))
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_path().filter(|p| p.exists())
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.settings.path = expand_path(&self.settings.path);
    }

    /// Validate configuration values
    fn validate_config(&self) -> Result<(), ConfigError> {
        let chunk_size = self.transport.chunk_size;
        if !(1024..=1_048_576).contains(&chunk_size) {
            return Err(ConfigError::Validation(
                "chunk_size must be between 1024 bytes (1KB) and 1048576 bytes (1MB)".to_string(),
            ));
        }

        if self.transport.max_frame_size < chunk_size {
            return Err(ConfigError::Validation(
                "max_frame_size must be at least chunk_size".to_string(),
            ));
        }
        if self.transport.max_frame_size > 268_435_456 {
            return Err(ConfigError::Validation(
                "max_frame_size must not exceed 268435456 bytes (256MB)".to_string(),
            ));
        }

        if !(50..=60_000).contains(&self.sync.poll_interval_ms) {
            return Err(ConfigError::Validation(
                "poll_interval_ms must be between 50 and 60000".to_string(),
            ));
        }

        if self.transport.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }

        if let Some(device) = self.discovery.devices.iter().find(|d| d.address.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "device '{}' has no address",
                device.name
            )));
        }

        Ok(())
    }

    /// Transport settings in the form the connection manager takes
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            service_id: self.service_id,
            chunk_size: self.transport.chunk_size,
            max_frame_size: self.transport.max_frame_size,
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery.scan_timeout_secs)
    }

    /// Validate configuration file at given path
    pub fn validate(path: &Path) -> Result<(), ConfigError> {
        Self::load_from_path(path).map(|_| ())
    }

    /// Write the commented example to `path`
    pub fn write_example(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();

        format!(
            r#"# BlueSync Configuration File
# Location: ~/.config/bluesync/config.toml

# Name shown to the other device
device_name = "{}"
# Service identifier; both devices must use the same one
service_id = "{}"
# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[transport]
# Address to listen on
bind_addr = "{}"
# Seconds to wait when connecting
connect_timeout_secs = {}
# Transfer chunk size in bytes (64KB default)
chunk_size = {}
# Largest message in bytes (50MB default)
max_frame_size = {}

[sync]
# How often the clipboard is checked, in milliseconds
poll_interval_ms = {}
# Send local clipboard changes to the other device
enabled = {}

[discovery]
# Seconds a device scan may take
scan_timeout_secs = {}

# Devices to offer when scanning
# [[discovery.devices]]
# name = "desk"
# address = "192.168.1.20:8485"
# paired = true

[settings]
# Remembers the last connected device
path = "{}"
"#,
            config.device_name,
            config.service_id,
            config.log_level,
            config.transport.bind_addr,
            config.transport.connect_timeout_secs,
            config.transport.chunk_size,
            config.transport.max_frame_size,
            config.sync.poll_interval_ms,
            config.sync.enabled,
            config.discovery.scan_timeout_secs,
            config.settings.path.display(),
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}
