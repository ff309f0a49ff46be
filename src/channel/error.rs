//! Live channel error types
//!
//! Only configuration problems ever reach callers. Transport failures are
//! absorbed by the reconnection loop and surface as log lines.

use thiserror::Error;

/// The configured broker endpoint cannot be used
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// The URL did not parse
    #[error("Invalid endpoint URL {url:?}: {reason}")]
    Invalid { url: String, reason: String },

    /// Only `ws` and `wss` are accepted
    #[error("Unsupported endpoint scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),
}

/// Failures of the underlying socket
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Receive failed: {0}")]
    Receive(String),
}

/// Errors returned by [`LiveTelemetryChannel::open`](super::LiveTelemetryChannel::open)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The endpoint is unusable; retrying will not help
    #[error("Endpoint configuration error: {0}")]
    Endpoint(#[from] EndpointError),

    /// `open()` was called outside a tokio runtime
    #[error("No tokio runtime available to drive the channel")]
    NoRuntime,
}
