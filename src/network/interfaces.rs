//! Local interface detection for discovery
//!
//! Broadcast discovery needs to know which interface faces the LAN: VPN and
//! CGNAT interfaces (Tailscale, ZeroTier) swallow broadcasts, so the derived
//! broadcast targets must come from a real private-range address.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::core::{Error, Result};

/// Coarse classification of a local IPv4 address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressCategory {
    /// Private network 10.0.0.0/8
    Private10,
    /// Private network 172.16.0.0/12
    Private172,
    /// Private network 192.168.0.0/16
    Private192,
    /// CGNAT 100.64.0.0/10, likely a VPN overlay
    CgnatVpn,
    /// Link-local 169.254.0.0/16, no DHCP lease
    LinkLocal,
    /// Public or unrecognized
    Other,
}

impl AddressCategory {
    /// Whether this category is a private LAN range worth broadcasting on
    pub fn is_private_lan(self) -> bool {
        matches!(
            self,
            AddressCategory::Private10 | AddressCategory::Private172 | AddressCategory::Private192
        )
    }
}

/// Categorizes a local IPv4 address
pub fn categorize(ip: Ipv4Addr) -> AddressCategory {
    let [a, b, _, _] = ip.octets();
    match (a, b) {
        (10, _) => AddressCategory::Private10,
        (172, 16..=31) => AddressCategory::Private172,
        (192, 168) => AddressCategory::Private192,
        (100, 64..=127) => AddressCategory::CgnatVpn,
        (169, 254) => AddressCategory::LinkLocal,
        _ => AddressCategory::Other,
    }
}

/// Finds the local IPv4 address of the default outbound interface
///
/// Connects a UDP socket toward a public address; no packet is sent, the
/// kernel just picks the route and reveals the local endpoint.
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => Err(Error::network(format!(
            "default route resolved to IPv6 address {}",
            ip
        ))),
    }
}

/// Derives the /24 and /16 broadcast addresses for a local address
pub fn derived_broadcasts(local: Ipv4Addr) -> Vec<Ipv4Addr> {
    let mut out = Vec::new();
    for prefix in [24, 16] {
        if let Ok(network) = Ipv4Network::new(local, prefix) {
            out.push(network.broadcast());
        }
    }
    out
}

/// Builds the default broadcast target list for discovery
///
/// Most specific first: the local interface's /24 and /16 broadcasts (skipped
/// when the interface looks like a VPN overlay), then the global broadcast
/// and common home-router defaults.
pub fn default_broadcast_targets() -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = Vec::new();

    match local_ipv4() {
        Ok(local) => {
            let category = categorize(local);
            debug!(%local, ?category, "detected outbound interface");
            if category.is_private_lan() {
                targets.extend(derived_broadcasts(local));
            }
        }
        Err(e) => debug!("could not detect local interface: {}", e),
    }

    let commons = [
        Ipv4Addr::BROADCAST,
        Ipv4Addr::new(192, 168, 1, 255),
        Ipv4Addr::new(192, 168, 0, 255),
        Ipv4Addr::new(10, 0, 0, 255),
    ];
    for addr in commons {
        if !targets.contains(&addr) {
            targets.push(addr);
        }
    }
    targets
}
