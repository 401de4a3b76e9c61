use std::io;
use thiserror::Error;

/// Custom error types for Kasa Relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new device-not-found error
    pub fn device_not_found(msg: impl Into<String>) -> Self {
        Error::DeviceNotFound(msg.into())
    }

    /// Creates a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Creates a new backend-unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Error::BackendUnavailable(msg.into())
    }
}
