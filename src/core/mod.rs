//! Core types and constants for the Kasa local protocol
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{Device, DeviceState, SysInfo};

/// TCP/UDP port Kasa devices listen on
pub const DEVICE_PORT: u16 = 9999;

/// Initial key for the XOR autokey cipher
pub const CIPHER_KEY: u8 = 171;

/// Maximum accepted frame payload size in bytes
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Description assigned to devices the user has not described yet
pub const DEFAULT_DESCRIPTION: &str = "Generic Device";
