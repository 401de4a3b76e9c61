use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::DEFAULT_DESCRIPTION;
use crate::core::{Error, Result};

/// Relay state of a smart plug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    On,
    Off,
}

impl DeviceState {
    /// Creates a state from the protocol's `relay_state` integer
    pub fn from_relay_state(relay_state: i64) -> Self {
        if relay_state == 1 {
            DeviceState::On
        } else {
            DeviceState::Off
        }
    }

    /// Returns the inverted state
    pub fn inverted(self) -> Self {
        match self {
            DeviceState::On => DeviceState::Off,
            DeviceState::Off => DeviceState::On,
        }
    }

    /// Returns the protocol's `relay_state` integer for this state
    pub fn relay_state(self) -> i64 {
        match self {
            DeviceState::On => 1,
            DeviceState::Off => 0,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::On => write!(f, "on"),
            DeviceState::Off => write!(f, "off"),
        }
    }
}

/// A registered smart plug
///
/// `ip` is the unique key across the system; `name` is the user alias used in
/// macros and commands; `description` is what the human-visible macro
/// replacement text is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Device IP address, unique key
    pub ip: Ipv4Addr,
    /// User alias, `[A-Za-z0-9_]+`, unique case-insensitively
    pub name: String,
    /// Vendor-reported alias, refreshed on demand
    pub original_name: String,
    /// Hardware model string
    pub model: String,
    /// Free-text description shown in visual macro replacements
    pub description: String,
    /// Last observed relay state
    pub state: DeviceState,
    /// Whether the device reports energy metering
    pub has_emeter: bool,
}

impl Device {
    /// Builds a device record from a first successful `get_sysinfo` exchange
    pub fn from_sysinfo(ip: Ipv4Addr, name: impl Into<String>, info: &SysInfo) -> Result<Self> {
        let name = name.into();
        validate_device_name(&name)?;
        Ok(Device {
            ip,
            name,
            original_name: info.alias.clone(),
            model: info.model.clone(),
            description: DEFAULT_DESCRIPTION.to_string(),
            state: DeviceState::from_relay_state(info.relay_state),
            has_emeter: info.has_emeter(),
        })
    }

    /// Applies a refreshed sysinfo snapshot to the vendor-owned fields
    pub fn apply_sysinfo(&mut self, info: &SysInfo) {
        self.original_name = info.alias.clone();
        self.model = info.model.clone();
        self.state = DeviceState::from_relay_state(info.relay_state);
        self.has_emeter = info.has_emeter();
    }
}

/// Device self-description returned by `get_sysinfo`
///
/// Only the fields the library acts on are modeled; everything else in the
/// response is ignored during deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysInfo {
    /// Vendor-reported device alias
    #[serde(default)]
    pub alias: String,
    /// Hardware model string
    #[serde(default)]
    pub model: String,
    /// Relay state, 1 = on
    #[serde(default)]
    pub relay_state: i64,
    /// Capability string, e.g. "TIM:ENE" on metering plugs
    #[serde(default)]
    pub feature: String,
}

impl SysInfo {
    /// Whether the capability string advertises energy metering
    pub fn has_emeter(&self) -> bool {
        self.feature.split(':').any(|f| f == "ENE")
    }
}

/// Validates a user-assigned device alias
///
/// Aliases are restricted to `[A-Za-z0-9_]+` so they embed safely in macro
/// syntax, which delimits on `:` and `}`.
pub fn validate_device_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("device name must not be empty"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::validation(format!(
            "device name '{}' contains characters outside [A-Za-z0-9_]",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_relay_state() {
        assert_eq!(DeviceState::from_relay_state(1), DeviceState::On);
        assert_eq!(DeviceState::from_relay_state(0), DeviceState::Off);
        assert_eq!(DeviceState::On.inverted(), DeviceState::Off);
        assert_eq!(DeviceState::Off.relay_state(), 0);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_device_name("Desk_Lamp2").is_ok());
        assert!(validate_device_name("").is_err());
        assert!(validate_device_name("desk lamp").is_err());
        assert!(validate_device_name("lamp:1").is_err());
        assert!(validate_device_name("lamp}").is_err());
    }

    #[test]
    fn test_emeter_detection() {
        let metering = SysInfo {
            feature: "TIM:ENE".to_string(),
            ..Default::default()
        };
        assert!(metering.has_emeter());

        let plain = SysInfo {
            feature: "TIM".to_string(),
            ..Default::default()
        };
        assert!(!plain.has_emeter());
    }

    #[test]
    fn test_device_from_sysinfo() {
        let info = SysInfo {
            alias: "Living Room Plug".to_string(),
            model: "HS110(EU)".to_string(),
            relay_state: 1,
            feature: "TIM:ENE".to_string(),
        };
        let device = Device::from_sysinfo("192.168.1.50".parse().unwrap(), "Lamp", &info).unwrap();
        assert_eq!(device.original_name, "Living Room Plug");
        assert_eq!(device.state, DeviceState::On);
        assert_eq!(device.description, "Generic Device");
        assert!(device.has_emeter);

        assert!(Device::from_sysinfo("192.168.1.50".parse().unwrap(), "bad name", &info).is_err());
    }
}
