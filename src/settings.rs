//! Persisted application settings
//!
//! Remembers the last device this machine connected to so `connect` can
//! reconnect to it without an address. Settings are a convenience: loading
//! or saving them never fails a command, problems are only logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Settings file errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Contents of `settings.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub last_address: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub last_connected: Option<DateTime<Utc>>,
}

impl AppSettings {
    /// Load settings, falling back to defaults when the file is missing or
    /// unreadable
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(SettingsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings, logging instead of failing
    pub fn save(&self, path: &Path) {
        if let Err(e) = self.try_save(path) {
            warn!("Failed to save settings to {}: {}", path.display(), e);
        }
    }

    pub fn try_save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Record a successful connection
    pub fn remember(&mut self, address: &str, name: &str) {
        self.last_address = Some(address.to_string());
        self.last_name = Some(name.to_string());
        self.last_connected = Some(Utc::now());
    }

    /// Address and name of the last connected device
    pub fn last_device(&self) -> Option<(&str, &str)> {
        let address = self.last_address.as_deref()?;
        Some((address, self.last_name.as_deref().unwrap_or(address)))
    }
}
