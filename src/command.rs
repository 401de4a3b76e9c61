//! Host-agnostic command surface
//!
//! The same operations the macro pipeline triggers, exposed as a
//! command-line-style API. Control operations report a human-readable
//! success/failure string and never raise; registry management operations
//! return typed results for the hosting UI.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::info;

use crate::backend::DeviceBackend;
use crate::core::{Device, DeviceState, Result};
use crate::cycle::{CycleOutcome, CycleScheduler, StopOutcome};
use crate::registry::DeviceRegistry;

/// One row of `status()` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub state: DeviceState,
    pub name: String,
    pub model: String,
    pub ip: Ipv4Addr,
}

/// Executes chat commands against registered devices
pub struct Commander {
    registry: Arc<DeviceRegistry>,
    backend: Arc<dyn DeviceBackend>,
    scheduler: CycleScheduler,
}

impl Commander {
    /// Creates a command surface over shared collaborators
    pub fn new(
        registry: Arc<DeviceRegistry>,
        backend: Arc<dyn DeviceBackend>,
        scheduler: CycleScheduler,
    ) -> Self {
        Commander {
            registry,
            backend,
            scheduler,
        }
    }

    /// Turns a named device on
    pub async fn on(&self, name: &str) -> String {
        let Some(device) = self.registry.find_by_name(name) else {
            return unknown_device(name);
        };
        match self.backend.turn_on(device.ip).await {
            Ok(()) => {
                self.registry.update_state(device.ip, DeviceState::On);
                format!("Turned {} on", device.name)
            }
            Err(e) => format!("Failed to turn {} on: {}", device.name, e),
        }
    }

    /// Turns a named device off
    pub async fn off(&self, name: &str) -> String {
        let Some(device) = self.registry.find_by_name(name) else {
            return unknown_device(name);
        };
        match self.backend.turn_off(device.ip).await {
            Ok(()) => {
                self.registry.update_state(device.ip, DeviceState::Off);
                format!("Turned {} off", device.name)
            }
            Err(e) => format!("Failed to turn {} off: {}", device.name, e),
        }
    }

    /// Reads a device's current state and sets the opposite
    pub async fn toggle(&self, name: &str) -> String {
        let Some(device) = self.registry.find_by_name(name) else {
            return unknown_device(name);
        };
        let next = match self.backend.relay_state(device.ip).await {
            Ok(state) => state.inverted(),
            Err(e) => return format!("Failed to read state of {}: {}", device.name, e),
        };
        let result = match next {
            DeviceState::On => self.backend.turn_on(device.ip).await,
            DeviceState::Off => self.backend.turn_off(device.ip).await,
        };
        match result {
            Ok(()) => {
                self.registry.update_state(device.ip, next);
                format!("Toggled {} {}", device.name, next)
            }
            Err(e) => format!("Failed to toggle {}: {}", device.name, e),
        }
    }

    /// Runs a named device on for `seconds`, queueing behind any active cycle
    pub async fn cycle(&self, name: &str, seconds: u64) -> String {
        let Some(device) = self.registry.find_by_name(name) else {
            return unknown_device(name);
        };
        match self
            .scheduler
            .request_cycle(device.ip, &device.description, seconds)
            .await
        {
            Ok(CycleOutcome::Started { duration_secs }) => {
                format!("Cycling {} for {}s", device.name, duration_secs)
            }
            Ok(CycleOutcome::Queued { position }) => format!(
                "Queued a {}s cycle for {} (position {})",
                seconds, device.name, position
            ),
            Err(e) => format!("Failed to cycle {}: {}", device.name, e),
        }
    }

    /// Cancels any active cycle for a named device
    pub async fn stop(&self, name: &str) -> String {
        let Some(device) = self.registry.find_by_name(name) else {
            return unknown_device(name);
        };
        match self.scheduler.stop(device.ip).await {
            StopOutcome::Stopped { discarded: 0 } => format!("Stopped cycle for {}", device.name),
            StopOutcome::Stopped { discarded } => format!(
                "Stopped cycle for {} and discarded {} queued",
                device.name, discarded
            ),
            StopOutcome::NoActiveCycle => format!("No active cycle for {}", device.name),
        }
    }

    /// Lists every registered device
    pub fn status(&self) -> Vec<StatusRow> {
        self.registry
            .list()
            .into_iter()
            .map(|d| StatusRow {
                state: d.state,
                name: d.name,
                model: d.model,
                ip: d.ip,
            })
            .collect()
    }

    /// Registers a device after a successful first contact
    ///
    /// The device must answer a `get_sysinfo` before it is added; an
    /// unreachable address is never registered.
    pub async fn add_device(&self, ip: Ipv4Addr, name: &str) -> Result<Device> {
        let info = self.backend.sysinfo(ip).await?;
        let device = Device::from_sysinfo(ip, name, &info)?;
        self.registry.upsert(device.clone())?;
        info!(%ip, name, "device registered");
        Ok(device)
    }

    /// Re-reads vendor-reported fields and state for a named device
    pub async fn refresh(&self, name: &str) -> Result<Device> {
        let device = self
            .registry
            .find_by_name(name)
            .ok_or_else(|| crate::core::Error::device_not_found(name.to_string()))?;
        let info = self.backend.sysinfo(device.ip).await?;
        self.registry.apply_sysinfo(device.ip, &info)
    }
}

fn unknown_device(name: &str) -> String {
    format!("No device named '{}'", name.trim())
}
