use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::core::{DeviceState, Error, Result, SysInfo, DEVICE_PORT};
use crate::protocol::{commands, FrameCodec};

/// Configuration for a device session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device TCP port
    pub port: u16,
    /// Bound on connecting plus the full request/response exchange
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port: DEVICE_PORT,
            timeout: Duration::from_secs(5),
        }
    }
}

/// A single request/response exchange channel to one device
///
/// Each [`send`](DeviceSession::send) opens a fresh TCP connection, writes one
/// framed command, reads one framed response, and closes. There is no retry;
/// a failed attempt is reported to the caller and retry policy, if any,
/// belongs there.
pub struct DeviceSession {
    ip: Ipv4Addr,
    config: SessionConfig,
}

impl DeviceSession {
    /// Creates a session for one device with default settings
    pub fn new(ip: Ipv4Addr) -> Self {
        Self::with_config(ip, SessionConfig::default())
    }

    /// Creates a session for one device with explicit settings
    pub fn with_config(ip: Ipv4Addr, config: SessionConfig) -> Self {
        DeviceSession { ip, config }
    }

    /// Returns the device address this session talks to
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Sends one command and returns the decoded response
    pub async fn send(&self, command: &Value) -> Result<Value> {
        let addr = SocketAddr::new(IpAddr::V4(self.ip), self.config.port);
        debug!(ip = %self.ip, %command, "sending device command");

        let stream = timeout(self.config.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::network(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::network(format!("connect to {} failed: {}", addr, e)))?;

        let mut framed = Framed::new(stream, FrameCodec::new());
        let exchange = async {
            framed.send(command).await?;
            match framed.next().await {
                Some(response) => response,
                None => Err(Error::network(format!(
                    "{} closed the connection before responding",
                    addr
                ))),
            }
        };
        let response = timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| Error::network(format!("exchange with {} timed out", addr)))??;

        commands::check_err_code(&response)?;
        Ok(response)
    }

    /// Queries device information and current state
    pub async fn get_info(&self) -> Result<SysInfo> {
        let response = self.send(&commands::info()).await?;
        commands::parse_sysinfo(&response)
    }

    /// Reads the current relay state
    pub async fn get_state(&self) -> Result<DeviceState> {
        let info = self.get_info().await?;
        Ok(DeviceState::from_relay_state(info.relay_state))
    }

    /// Turns the relay on
    pub async fn turn_on(&self) -> Result<()> {
        self.send(&commands::set_relay(DeviceState::On)).await?;
        Ok(())
    }

    /// Turns the relay off
    pub async fn turn_off(&self) -> Result<()> {
        self.send(&commands::set_relay(DeviceState::Off)).await?;
        Ok(())
    }

    /// Reads the current state and sets the opposite, returning the new state
    pub async fn toggle(&self) -> Result<DeviceState> {
        let next = self.get_state().await?.inverted();
        self.send(&commands::set_relay(next)).await?;
        Ok(next)
    }

    /// Sets the status LED on or off
    pub async fn set_led(&self, on: bool) -> Result<()> {
        self.send(&commands::set_led(on)).await?;
        Ok(())
    }

    /// Reboots the device after `delay` seconds
    pub async fn reboot(&self, delay: u32) -> Result<()> {
        self.send(&commands::reboot(delay)).await?;
        Ok(())
    }

    /// Reads real-time energy meter data (metering plugs only)
    pub async fn get_emeter(&self) -> Result<Value> {
        self.send(&commands::emeter()).await
    }

    /// Queries cloud connectivity information
    pub async fn get_cloud_info(&self) -> Result<Value> {
        self.send(&commands::cloud_info()).await
    }

    /// Asks the device to scan for nearby wifi networks
    pub async fn scan_wifi(&self) -> Result<Value> {
        self.send(&commands::wifi_scan()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    /// One-shot fake device: answers the first framed command with `response`.
    async fn fake_device(response: Value) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new());
            let _request = framed.next().await.unwrap().unwrap();
            framed.send(&response).await.unwrap();
        });
        port
    }

    fn session(port: u16) -> DeviceSession {
        DeviceSession::with_config(
            "127.0.0.1".parse().unwrap(),
            SessionConfig {
                port,
                timeout: Duration::from_millis(500),
            },
        )
    }

    #[tokio::test]
    async fn test_get_info_exchange() {
        let port = fake_device(json!({
            "system": {"get_sysinfo": {
                "err_code": 0,
                "alias": "Fan",
                "model": "HS100",
                "relay_state": 1,
                "feature": "TIM",
            }}
        }))
        .await;

        let info = session(port).get_info().await.unwrap();
        assert_eq!(info.alias, "Fan");
        assert_eq!(info.relay_state, 1);
    }

    #[tokio::test]
    async fn test_nonzero_err_code_is_protocol_error() {
        let port = fake_device(json!({
            "system": {"set_relay_state": {"err_code": -3, "err_msg": "invalid argument"}}
        }))
        .await;

        let err = session(port).turn_on().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        // Accepts the connection but never responds
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = session(port).get_state().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        // Bind then drop to get a port nothing is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = session(port).turn_off().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
