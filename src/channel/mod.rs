//! Live Telemetry Channel
//!
//! Keeps a subscription to the broker's live sensor topic open and hands the
//! most recent snapshot to any number of consumers.
//!
//! ## Architecture
//!
//! - **LiveTelemetryChannel**: session lifecycle, reconnection, fan-out
//! - **LiveView**: scoped observer that keeps the channel open while held
//! - **Transport**: socket abstraction; `WsTransport` is the real one
//! - **Endpoint**: URL selection and the secure-origin `wss://` upgrade
//! - **Payload**: decoded JSON snapshot plus key normalization helpers
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected --open()--> Connecting --CONNECTED--> Connected
//!      ^                       |                        |
//!      |                       v                        v
//!      +-------close()---- Reconnecting <--- connection lost
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use hydroleaf_live::channel::LiveTelemetryChannel;
//! use hydroleaf_live::config::ChannelConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = LiveTelemetryChannel::new(ChannelConfig::default());
//!     channel.on_payload(|payload| println!("{}", payload.value()));
//!     channel.open()?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     channel.shutdown().await;
//!     Ok(())
//! }
//! ```

mod endpoint;
mod error;
mod live;
mod payload;
mod shared;
mod state;
mod transport;

#[cfg(test)]
mod testing;

pub use endpoint::{origin_is_secure, resolve_endpoint, DEFAULT_ENDPOINT};
pub use error::{ChannelError, EndpointError, TransportError};
pub use live::{CallbackId, LiveTelemetryChannel, LiveView};
pub use payload::{canonical_key, normalize_keys, TelemetryPayload};
pub use shared::{reset_shared_channel, shared_channel, shared_channel_initialized};
pub use state::ChannelState;
pub use transport::{Connection, Transport, WsTransport};
