//! Kasa Relay: local-network control of TP-Link Kasa smart plugs.
//!
//! This library speaks the reverse-engineered Kasa local protocol (XOR autokey
//! cipher over TCP/UDP port 9999), discovers plugs on the local subnet, runs
//! timed on/off cycles with per-device queueing, and rewrites chat messages
//! containing inline `{{tplink-...}}` control macros into separate
//! machine-context and human-visual projections.

pub mod backend;
pub mod command;
pub mod core;
pub mod cycle;
pub mod macros;
pub mod network;
pub mod protocol;
pub mod registry;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
