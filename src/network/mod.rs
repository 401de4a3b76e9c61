//! Network layer: per-device sessions, broadcast discovery, and subnet scanning

pub mod discovery;
pub mod interfaces;
pub mod scan;
pub mod session;

pub use self::discovery::{discover, DiscoveryConfig};
pub use self::scan::{scan_subnet, ScanConfig, ScanReport};
pub use self::session::{DeviceSession, SessionConfig};
