use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::{stream, SinkExt, StreamExt};
use ipnetwork::Ipv4Network;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::core::DEVICE_PORT;
use crate::protocol::{commands, FrameCodec};

/// Configuration for the fallback TCP subnet scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Device TCP port to probe
    pub port: u16,
    /// Per-host connect timeout
    pub connect_timeout: Duration,
    /// Per-host protocol exchange timeout, applied after a connect succeeds
    pub exchange_timeout: Duration,
    /// Maximum concurrent connection attempts.
    /// Capped so a /24 sweep cannot exhaust sockets.
    pub concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            port: DEVICE_PORT,
            connect_timeout: Duration::from_millis(500),
            exchange_timeout: Duration::from_secs(2),
            concurrency: 64,
        }
    }
}

/// Result of scanning one subnet
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Hosts that completed a `get_sysinfo` exchange
    pub kasa_devices: Vec<Ipv4Addr>,
    /// Hosts with the port open that failed the protocol exchange
    pub other_devices: Vec<Ipv4Addr>,
}

/// How one probed host responded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostClass {
    Closed,
    OpenSilent,
    Kasa,
}

/// Sweeps every host address in `network` for devices
///
/// Broadcast discovery is faster but fails across VLAN or broadcast-filtered
/// networks; this scan is the slow, reliable fallback. Hosts accepting a TCP
/// connection on the device port are classified by attempting a `get_sysinfo`
/// exchange.
pub async fn scan_subnet(network: Ipv4Network, config: &ScanConfig) -> ScanReport {
    let hosts: Vec<Ipv4Addr> = network
        .iter()
        .filter(|&ip| ip != network.network() && ip != network.broadcast())
        .collect();
    info!(%network, hosts = hosts.len(), "scanning subnet for devices");

    let classified: Vec<(Ipv4Addr, HostClass)> = stream::iter(hosts)
        .map(|ip| async move { (ip, probe_host(ip, config).await) })
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let mut report = ScanReport::default();
    for (ip, class) in classified {
        match class {
            HostClass::Kasa => report.kasa_devices.push(ip),
            HostClass::OpenSilent => report.other_devices.push(ip),
            HostClass::Closed => {}
        }
    }
    report.kasa_devices.sort_unstable();
    report.other_devices.sort_unstable();
    info!(
        kasa = report.kasa_devices.len(),
        other = report.other_devices.len(),
        "subnet scan complete"
    );
    report
}

/// Probes one host: connect, then classify with a `get_sysinfo` exchange
async fn probe_host(ip: Ipv4Addr, config: &ScanConfig) -> HostClass {
    let addr = SocketAddr::new(IpAddr::V4(ip), config.port);
    let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        _ => return HostClass::Closed,
    };
    debug!(%ip, "port open, attempting protocol exchange");

    let mut framed = Framed::new(stream, FrameCodec::new());
    let exchange = async {
        framed.send(&commands::info()).await.ok()?;
        framed.next().await?.ok()
    };
    match timeout(config.exchange_timeout, exchange).await {
        Ok(Some(_response)) => HostClass::Kasa,
        _ => HostClass::OpenSilent,
    }
}
