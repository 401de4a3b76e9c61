//! Device execution backend
//!
//! The scheduler, macro pipeline, and command surface reach devices through
//! the [`DeviceBackend`] trait rather than raw sessions, so hosts that route
//! device I/O through an indirection (or tests that want no sockets at all)
//! can substitute their own implementation.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{DeviceState, Result, SysInfo};
use crate::network::{DeviceSession, SessionConfig};
use crate::protocol::commands;

/// One device operation, independent of how it reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    /// Query `get_sysinfo`
    Info,
    /// Set the relay on or off
    SetRelay(DeviceState),
    /// Set the status LED on or off
    SetLed(bool),
    /// Reboot after a delay in seconds
    Reboot(u32),
    /// Query real-time energy metering
    Emeter,
}

/// Executes device operations against an addressed device
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Executes one operation and returns the raw response
    async fn execute(&self, ip: Ipv4Addr, op: DeviceOp) -> Result<Value>;

    /// Turns the relay on
    async fn turn_on(&self, ip: Ipv4Addr) -> Result<()> {
        self.execute(ip, DeviceOp::SetRelay(DeviceState::On))
            .await
            .map(|_| ())
    }

    /// Turns the relay off
    async fn turn_off(&self, ip: Ipv4Addr) -> Result<()> {
        self.execute(ip, DeviceOp::SetRelay(DeviceState::Off))
            .await
            .map(|_| ())
    }

    /// Queries and parses device information
    async fn sysinfo(&self, ip: Ipv4Addr) -> Result<SysInfo> {
        let response = self.execute(ip, DeviceOp::Info).await?;
        commands::parse_sysinfo(&response)
    }

    /// Reads the current relay state
    async fn relay_state(&self, ip: Ipv4Addr) -> Result<DeviceState> {
        let info = self.sysinfo(ip).await?;
        Ok(DeviceState::from_relay_state(info.relay_state))
    }
}

/// Backend that opens a direct TCP session per operation
#[derive(Debug, Clone, Default)]
pub struct SessionBackend {
    config: SessionConfig,
}

impl SessionBackend {
    /// Creates a backend with default session settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with explicit session settings
    pub fn with_config(config: SessionConfig) -> Self {
        SessionBackend { config }
    }
}

#[async_trait]
impl DeviceBackend for SessionBackend {
    async fn execute(&self, ip: Ipv4Addr, op: DeviceOp) -> Result<Value> {
        let session = DeviceSession::with_config(ip, self.config.clone());
        let body = match op {
            DeviceOp::Info => commands::info(),
            DeviceOp::SetRelay(state) => commands::set_relay(state),
            DeviceOp::SetLed(on) => commands::set_led(on),
            DeviceOp::Reboot(delay) => commands::reboot(delay),
            DeviceOp::Emeter => commands::emeter(),
        };
        session.send(&body).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::core::Error;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Records every issued operation; optionally fails whole devices.
    #[derive(Default)]
    pub struct MockBackend {
        calls: Mutex<Vec<(Ipv4Addr, DeviceOp)>>,
        failing: Mutex<HashSet<Ipv4Addr>>,
        infos: Mutex<HashMap<Ipv4Addr, Value>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> Vec<(Ipv4Addr, DeviceOp)> {
            self.calls.lock().expect("lock poisoned").clone()
        }

        pub fn set_failing(&self, ip: Ipv4Addr, failing: bool) {
            let mut set = self.failing.lock().expect("lock poisoned");
            if failing {
                set.insert(ip);
            } else {
                set.remove(&ip);
            }
        }

        pub fn set_info(&self, ip: Ipv4Addr, sysinfo: Value) {
            self.infos
                .lock()
                .expect("lock poisoned")
                .insert(ip, json!({"system": {"get_sysinfo": sysinfo}}));
        }
    }

    #[async_trait]
    impl DeviceBackend for MockBackend {
        async fn execute(&self, ip: Ipv4Addr, op: DeviceOp) -> Result<Value> {
            self.calls.lock().expect("lock poisoned").push((ip, op));
            if self.failing.lock().expect("lock poisoned").contains(&ip) {
                return Err(Error::network(format!("{} unreachable", ip)));
            }
            match op {
                DeviceOp::Info => self
                    .infos
                    .lock()
                    .expect("lock poisoned")
                    .get(&ip)
                    .cloned()
                    .ok_or_else(|| Error::network(format!("{} unreachable", ip))),
                _ => Ok(json!({"system": {"set_relay_state": {"err_code": 0}}})),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockBackend;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_provided_helpers_route_through_execute() {
        let backend = MockBackend::new();
        let ip: Ipv4Addr = "192.168.1.10".parse().unwrap();
        backend.set_info(
            ip,
            json!({"alias": "Plug", "model": "HS100", "relay_state": 1, "feature": "TIM", "err_code": 0}),
        );

        backend.turn_on(ip).await.unwrap();
        assert_eq!(backend.relay_state(ip).await.unwrap(), DeviceState::On);
        assert_eq!(
            backend.calls(),
            vec![
                (ip, DeviceOp::SetRelay(DeviceState::On)),
                (ip, DeviceOp::Info),
            ]
        );
    }
}
