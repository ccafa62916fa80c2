//! Manually configured devices
//!
//! The device list comes from `[[discovery.devices]]` in the config file.
//! Pairing state is kept per device for the lifetime of the process.

use super::{DeviceDiscovery, DeviceInfo, DiscoveryError, Pairing};
use crate::config::DeviceEntry;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct KnownDevice {
    info: DeviceInfo,
    pin: Option<String>,
}

/// Devices listed in the configuration
#[derive(Debug, Default)]
pub struct StaticDevices {
    devices: RwLock<Vec<KnownDevice>>,
}

impl StaticDevices {
    pub fn new(entries: &[DeviceEntry]) -> Self {
        let devices = entries
            .iter()
            .map(|entry| KnownDevice {
                info: DeviceInfo {
                    paired: entry.paired,
                    ..DeviceInfo::new(&entry.name, &entry.address)
                },
                pin: entry.pin.clone(),
            })
            .collect();
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Look a device up by address
    pub async fn get(&self, address: &str) -> Option<DeviceInfo> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.info.address == address)
            .map(|d| d.info.clone())
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDevices {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DeviceInfo>, DiscoveryError> {
        let now = Utc::now();
        let mut devices = self.devices.write().await;
        for device in devices.iter_mut() {
            device.info.last_seen = Some(now);
        }
        debug!("Found {} configured device(s)", devices.len());
        Ok(devices.iter().map(|d| d.info.clone()).collect())
    }
}

#[async_trait]
impl Pairing for StaticDevices {
    async fn is_paired(&self, address: &str) -> Result<bool, DiscoveryError> {
        self.get(address)
            .await
            .map(|d| d.paired)
            .ok_or_else(|| DiscoveryError::UnknownDevice(address.to_string()))
    }

    async fn pair(&self, address: &str, pin: Option<&str>) -> Result<(), DiscoveryError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .iter_mut()
            .find(|d| d.info.address == address)
            .ok_or_else(|| DiscoveryError::UnknownDevice(address.to_string()))?;

        if device.pin.is_some() && device.pin.as_deref() != pin {
            return Err(DiscoveryError::PairingFailed {
                address: address.to_string(),
                reason: "PIN rejected".to_string(),
            });
        }
        device.info.paired = true;
        Ok(())
    }
}
