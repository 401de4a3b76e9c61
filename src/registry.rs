//! In-memory device registry
//!
//! Owns every [`Device`] record. The control components (scheduler, macro
//! pipeline, command surface) take snapshots per operation and never hold a
//! record across I/O; anything learned from the device afterwards is written
//! back through the registry.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::core::types::validate_device_name;
use crate::core::{Device, DeviceState, Error, Result, SysInfo};

/// Registry of known devices, keyed by IP
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<Ipv4Addr, Device>>,
}

impl DeviceRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all devices, sorted by alias
    pub fn list(&self) -> Vec<Device> {
        let devices = self.devices.lock().expect("lock poisoned");
        let mut out: Vec<Device> = devices.values().cloned().collect();
        out.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        out
    }

    /// Inserts or replaces a device record
    ///
    /// The alias must match `[A-Za-z0-9_]+` and be unique case-insensitively
    /// across all other devices.
    pub fn upsert(&self, device: Device) -> Result<()> {
        validate_device_name(&device.name)?;
        let mut devices = self.devices.lock().expect("lock poisoned");
        let taken = devices
            .values()
            .any(|d| d.ip != device.ip && d.name.eq_ignore_ascii_case(&device.name));
        if taken {
            return Err(Error::validation(format!(
                "device name '{}' is already in use",
                device.name
            )));
        }
        devices.insert(device.ip, device);
        Ok(())
    }

    /// Removes a device, returning its record if it existed
    pub fn remove(&self, ip: Ipv4Addr) -> Option<Device> {
        self.devices.lock().expect("lock poisoned").remove(&ip)
    }

    /// Looks up a device by IP
    pub fn get(&self, ip: Ipv4Addr) -> Option<Device> {
        self.devices.lock().expect("lock poisoned").get(&ip).cloned()
    }

    /// Looks up a device by alias, trimmed and case-insensitive
    pub fn find_by_name(&self, name: &str) -> Option<Device> {
        let name = name.trim();
        let devices = self.devices.lock().expect("lock poisoned");
        devices
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Changes a device's alias
    pub fn rename(&self, ip: Ipv4Addr, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        validate_device_name(&name)?;
        let mut devices = self.devices.lock().expect("lock poisoned");
        let taken = devices
            .values()
            .any(|d| d.ip != ip && d.name.eq_ignore_ascii_case(&name));
        if taken {
            return Err(Error::validation(format!(
                "device name '{}' is already in use",
                name
            )));
        }
        let device = devices
            .get_mut(&ip)
            .ok_or_else(|| Error::device_not_found(ip.to_string()))?;
        device.name = name;
        Ok(())
    }

    /// Changes a device's free-text description
    pub fn set_description(&self, ip: Ipv4Addr, description: impl Into<String>) -> Result<()> {
        let mut devices = self.devices.lock().expect("lock poisoned");
        let device = devices
            .get_mut(&ip)
            .ok_or_else(|| Error::device_not_found(ip.to_string()))?;
        device.description = description.into();
        Ok(())
    }

    /// Records an observed relay state
    ///
    /// Unknown IPs are ignored: control paths may act on devices that were
    /// removed mid-operation.
    pub fn update_state(&self, ip: Ipv4Addr, state: DeviceState) {
        let mut devices = self.devices.lock().expect("lock poisoned");
        if let Some(device) = devices.get_mut(&ip) {
            device.state = state;
        }
    }

    /// Applies a refreshed sysinfo snapshot, returning the updated record
    pub fn apply_sysinfo(&self, ip: Ipv4Addr, info: &SysInfo) -> Result<Device> {
        let mut devices = self.devices.lock().expect("lock poisoned");
        let device = devices
            .get_mut(&ip)
            .ok_or_else(|| Error::device_not_found(ip.to_string()))?;
        device.apply_sysinfo(info);
        Ok(device.clone())
    }
}
