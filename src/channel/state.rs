use std::fmt;

/// Connection state of a live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// Not open, or closed. No timers, no socket.
    #[default]
    Disconnected,
    /// First connection attempt after `open()` is in flight
    Connecting,
    /// Broker acknowledged the session and the subscription is live
    Connected,
    /// Connection was lost; waiting for, or running, a retry attempt
    Reconnecting,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Reconnecting => "reconnecting",
        }
    }

    /// Whether the channel currently owns a session task
    pub fn is_active(&self) -> bool {
        !matches!(self, ChannelState::Disconnected)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
