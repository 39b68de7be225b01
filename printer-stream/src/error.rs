//! Error types for the printer-stream crate.

use std::time::Duration;

use moonraker_rpc::{CodecError, RpcErrorObject};

/// Invalid or incomplete connection configuration.
///
/// Fatal to `connect()`; no reconnect is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No printer host was configured
    #[error("Printer host is not configured")]
    MissingHost,

    /// No printer port was configured
    #[error("Printer port is not configured")]
    MissingPort,

    /// A value is present but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by a transport. Always recoverable through reconnection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not be opened
    #[error("Failed to open transport: {0}")]
    Open(String),

    /// Reading or writing failed
    #[error("Transport I/O error: {0}")]
    Io(String),

    /// The transport is closed
    #[error("Transport closed")]
    Closed,
}

/// Failure of a single correlated call. Only the caller sees it.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// No transport is open
    #[error("Not connected")]
    NotConnected,

    /// No response arrived before the deadline
    #[error("Call {method} timed out after {after:?}")]
    Timeout {
        /// Method of the stalled call
        method: String,
        /// Configured call timeout
        after: Duration,
    },

    /// The transport went away while the call was pending
    #[error("Call cancelled")]
    Cancelled,

    /// The server answered with an error object
    #[error("Remote error: {0}")]
    Remote(RpcErrorObject),

    /// The call could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] CodecError),
}

/// Errors surfaced synchronously by the connection manager.
///
/// Lifecycle failures (transport loss, handshake rejection) are reported as
/// [`ConnectionState`](crate::ConnectionState) transitions instead.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The background connection task did not stop cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Convenience type alias for Results using ConnectionError.
pub type Result<T> = std::result::Result<T, ConnectionError>;
