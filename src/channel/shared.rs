//! Process-wide channel
//!
//! Dashboard widgets all read the same live topic, so the process keeps one
//! lazily created [`LiveTelemetryChannel`] that every caller shares.

use std::sync::{Arc, Mutex};

use super::live::{lock, LiveTelemetryChannel};
use crate::config::ChannelConfig;

static SHARED: Mutex<Option<Arc<LiveTelemetryChannel>>> = Mutex::new(None);

/// Get the shared channel, creating it from `config` on first use.
///
/// Later calls return the existing channel and ignore their `config`.
pub fn shared_channel(config: &ChannelConfig) -> Arc<LiveTelemetryChannel> {
    let mut shared = lock(&SHARED);
    if let Some(channel) = shared.as_ref() {
        if channel.config() != config {
            tracing::debug!("Shared live channel already exists; ignoring new config");
        }
        return Arc::clone(channel);
    }

    let channel = Arc::new(LiveTelemetryChannel::new(config.clone()));
    *shared = Some(Arc::clone(&channel));
    tracing::debug!(topic = %channel.destination(), "Created shared live channel");
    channel
}

pub fn shared_channel_initialized() -> bool {
    lock(&SHARED).is_some()
}

/// Close and forget the shared channel. Returns false if there was none.
pub fn reset_shared_channel() -> bool {
    let channel = lock(&SHARED).take();
    match channel {
        Some(channel) => {
            channel.close();
            true
        }
        None => false,
    }
}
