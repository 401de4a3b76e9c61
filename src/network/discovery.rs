use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use super::interfaces;
use crate::core::{Error, Result, DEVICE_PORT};
use crate::protocol::{cipher, commands};

/// Configuration for UDP broadcast discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Destination port for probes
    pub port: u16,
    /// How long to aggregate replies after probing starts
    pub window: Duration,
    /// Number of probe rounds sent to every target
    pub probe_rounds: u32,
    /// Pause between probe rounds
    pub probe_spacing: Duration,
    /// Broadcast targets; empty means derive from the local interface
    pub targets: Vec<Ipv4Addr>,
    /// Whether probes carry the 4-byte TCP-style length prefix.
    /// Deployments disagree here, so the receive path auto-detects either way.
    pub prefix_probe: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            port: DEVICE_PORT,
            window: Duration::from_secs(3),
            probe_rounds: 5,
            probe_spacing: Duration::from_millis(200),
            targets: Vec::new(),
            prefix_probe: false,
        }
    }
}

/// Discovers devices by broadcasting a `get_sysinfo` probe
///
/// Every reply datagram's source address is a candidate device. Malformed
/// replies and echoes of our own probe are dropped without failing the scan.
/// Returns the deduplicated set of responding addresses.
pub async fn discover(config: &DiscoveryConfig) -> Result<Vec<Ipv4Addr>> {
    let socket = Arc::new(bind_broadcast_socket(config.port)?);
    let probe = probe_bytes(config.prefix_probe);

    let targets = if config.targets.is_empty() {
        interfaces::default_broadcast_targets()
    } else {
        config.targets.clone()
    };
    debug!(?targets, rounds = config.probe_rounds, "starting broadcast discovery");

    // Probe rounds run concurrently with reply aggregation so early replies
    // are not lost.
    let prober = {
        let socket = Arc::clone(&socket);
        let targets = targets.clone();
        let probe = probe.clone();
        let rounds = config.probe_rounds;
        let spacing = config.probe_spacing;
        let port = config.port;
        tokio::spawn(async move {
            for round in 0..rounds {
                for &target in &targets {
                    let addr = SocketAddr::new(IpAddr::V4(target), port);
                    if let Err(e) = socket.send_to(&probe, addr).await {
                        if round == 0 {
                            debug!(%target, "broadcast send failed: {}", e);
                        }
                    }
                }
                sleep(spacing).await;
            }
        })
    };

    let mut discovered = BTreeSet::new();
    let deadline = Instant::now() + config.window;
    let mut buf = [0u8; 4096];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (len, source) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!("discovery receive failed: {}", e);
                break;
            }
            Err(_) => break,
        };

        let IpAddr::V4(source_ip) = source.ip() else { continue };
        match parse_reply(&buf[..len]) {
            Some(reply) if is_device_reply(&reply) => {
                debug!(%source_ip, "discovery reply");
                discovered.insert(source_ip);
            }
            Some(_) => debug!(%source_ip, "dropping probe echo"),
            None => warn!(%source_ip, "dropping malformed discovery datagram"),
        }
    }

    prober.abort();
    Ok(discovered.into_iter().collect())
}

/// Builds the encoded probe datagram
fn probe_bytes(prefixed: bool) -> Vec<u8> {
    let payload = cipher::encode(commands::info().to_string().as_bytes());
    if prefixed {
        let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(&payload);
        framed
    } else {
        payload
    }
}

/// Binds a broadcast-capable UDP socket
///
/// Devices reply to port 9999 in some firmware revisions, so that port is
/// preferred; when it is taken an ephemeral port is used instead.
fn bind_broadcast_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let preferred = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    if socket.bind(&preferred.into()).is_err() {
        debug!(port, "preferred discovery port taken, binding ephemeral");
        let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        socket.bind(&fallback.into())?;
    }

    UdpSocket::from_std(socket.into()).map_err(Error::from)
}

/// Decodes one reply datagram, tolerating both framing conventions
///
/// If the first 4 bytes form a big-endian length equal to the remaining
/// payload the TCP-style prefix is stripped; otherwise the whole datagram is
/// treated as the encoded payload.
fn parse_reply(datagram: &[u8]) -> Option<Value> {
    let payload = strip_length_prefix(datagram);
    serde_json::from_slice(&cipher::decode(payload)).ok()
}

fn strip_length_prefix(datagram: &[u8]) -> &[u8] {
    if datagram.len() > 4 {
        let declared = u32::from_be_bytes([datagram[0], datagram[1], datagram[2], datagram[3]]);
        if declared as usize == datagram.len() - 4 {
            return &datagram[4..];
        }
    }
    datagram
}

/// Distinguishes a real sysinfo reply from an echo of our own probe
///
/// The probe's `get_sysinfo` object is empty; any real reply carries fields.
fn is_device_reply(reply: &Value) -> bool {
    reply
        .pointer("/system/get_sysinfo")
        .and_then(Value::as_object)
        .is_some_and(|body| !body.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encoded_datagram(value: &Value, prefixed: bool) -> Vec<u8> {
        let payload = cipher::encode(value.to_string().as_bytes());
        if prefixed {
            let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
            framed.extend_from_slice(&payload);
            framed
        } else {
            payload
        }
    }

    #[test]
    fn test_parse_reply_both_framings() {
        let reply = json!({"system": {"get_sysinfo": {"alias": "Plug", "err_code": 0}}});
        assert_eq!(
            parse_reply(&encoded_datagram(&reply, false)),
            Some(reply.clone())
        );
        assert_eq!(parse_reply(&encoded_datagram(&reply, true)), Some(reply));
        assert_eq!(parse_reply(&[0x01, 0x02, 0x03]), None);
    }

    #[test]
    fn test_echo_detection() {
        assert!(!is_device_reply(&commands::info()));
        assert!(is_device_reply(
            &json!({"system": {"get_sysinfo": {"alias": "Plug"}}})
        ));
        assert!(!is_device_reply(&json!({"unrelated": 1})));
    }

    #[tokio::test]
    async fn test_loopback_discovery() {
        // Fake device on loopback; discovery targets it directly.
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_port = device.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            let (_, source) = device.recv_from(&mut buf).await.unwrap();
            let reply = json!({"system": {"get_sysinfo": {
                "alias": "Plug", "model": "HS100", "relay_state": 0, "err_code": 0,
            }}});
            device
                .send_to(&encoded_datagram(&reply, false), source)
                .await
                .unwrap();
        });

        let config = DiscoveryConfig {
            port: device_port,
            window: Duration::from_millis(500),
            probe_rounds: 1,
            probe_spacing: Duration::from_millis(10),
            targets: vec!["127.0.0.1".parse().unwrap()],
            prefix_probe: false,
        };
        let found = discover(&config).await.unwrap();
        assert_eq!(found, vec!["127.0.0.1".parse::<Ipv4Addr>().unwrap()]);
    }
}
