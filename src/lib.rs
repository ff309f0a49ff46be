//! # Hydroleaf Live
//!
//! Live telemetry for the Hydroleaf dashboard: a reconnecting STOMP-over-
//! WebSocket subscription to the broker's `/topic/live_now` feed.
//!
//! ## Features
//!
//! - **Single session**: at most one broker connection per channel
//! - **Fixed-delay reconnection**: retries forever until closed
//! - **Fan-out**: every registered callback sees every decoded payload
//! - **Scoped observers**: the channel runs while any `LiveView` is held
//!
//! ## Modules
//!
//! - [`channel`]: The live channel, its transport and payload types
//! - [`stomp`]: STOMP frame codec and heart-beat negotiation
//! - [`config`]: TOML + environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hydroleaf_live::{shared_channel, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let channel = shared_channel(&config.channel);
//!
//!     let mut view = channel.observe()?;
//!     while let Some(payload) = view.next_payload().await {
//!         println!("{} at {}", payload.value(), payload.received_at());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod stomp;

// Re-export top-level types for convenience
pub use channel::{
    canonical_key, normalize_keys, reset_shared_channel, shared_channel, CallbackId,
    ChannelError, ChannelState, EndpointError, LiveTelemetryChannel, LiveView, TelemetryPayload,
    Transport, TransportError, WsTransport,
};

pub use config::{ChannelConfig, Config, ConfigError, LoggingConfig, LIVE_TOPIC};

pub use stomp::{Frame, FrameError, HeartBeat};
