//! Device discovery and pairing
//!
//! Finding a peer happens before any session exists: the initiator scans
//! for devices, picks one, makes sure it is paired and then dials its
//! address.

pub mod devices;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use devices::StaticDevices;

/// PINs tried, in order, when pairing without one fails
pub const COMMON_PINS: [&str; 3] = ["0000", "1234", "000000"];

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Device is not known
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Pairing was refused
    #[error("Pairing with {address} failed: {reason}")]
    PairingFailed { address: String, reason: String },

    /// Scan could not complete
    #[error("Device scan failed: {0}")]
    Scan(String),
}

/// A device that can be dialed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable name
    pub name: String,
    /// Address the transport dials
    pub address: String,
    /// Whether the device is paired with this one
    pub paired: bool,
    /// When the device was last seen by a scan
    pub last_seen: Option<DateTime<Utc>>,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            paired: false,
            last_seen: None,
        }
    }
}

/// Trait for device discovery implementations
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Devices reachable within `timeout`
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceInfo>, DiscoveryError>;
}

/// Trait for pairing implementations
#[async_trait]
pub trait Pairing: Send + Sync {
    async fn is_paired(&self, address: &str) -> Result<bool, DiscoveryError>;

    /// Pair with the device, optionally using a PIN
    async fn pair(&self, address: &str, pin: Option<&str>) -> Result<(), DiscoveryError>;
}

/// Make sure `address` is paired before dialing it.
///
/// Tries pairing without a PIN first, then each of [`COMMON_PINS`].
pub async fn ensure_paired(pairing: &dyn Pairing, address: &str) -> Result<(), DiscoveryError> {
    if pairing.is_paired(address).await? {
        debug!("{} is already paired", address);
        return Ok(());
    }

    info!("Pairing with {}", address);
    let attempts = std::iter::once(None).chain(COMMON_PINS.iter().copied().map(Some));
    let mut last_error = None;
    for pin in attempts {
        match pairing.pair(address, pin).await {
            Ok(()) => {
                info!("Paired with {}", address);
                return Ok(());
            }
            Err(e @ DiscoveryError::UnknownDevice(_)) => return Err(e),
            Err(e) => {
                debug!("Pairing attempt with {} failed: {}", address, e);
                last_error = Some(e);
            }
        }
    }

    warn!("Could not pair with {}", address);
    Err(last_error.unwrap_or_else(|| DiscoveryError::PairingFailed {
        address: address.to_string(),
        reason: "no pairing attempt succeeded".to_string(),
    }))
}
