//! STOMP Codec
//!
//! Minimal client side of the STOMP 1.2 text protocol, as spoken by the
//! Hydroleaf broker over WebSocket:
//!
//! - **Frame**: command + headers + body, with encode/decode
//! - **Heart-beats**: bare end-of-line messages used for keepalive
//!
//! Only the frames a read-only subscriber needs are built here
//! (CONNECT, SUBSCRIBE, UNSUBSCRIBE, DISCONNECT). There is no SEND path.
//!
//! ```text
//! SUBSCRIBE
//! id:sub-0
//! destination:/topic/live_now
//! ack:auto
//!
//! ^@
//! ```

mod error;
mod frame;

pub use error::{FrameError, FrameResult};
pub use frame::{decode_message, Command, Frame, Inbound, HeartBeat};

/// Protocol versions offered in CONNECT
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Prefix applied to shorthand topic names
pub const TOPIC_PREFIX: &str = "/topic/";

/// Expand a shorthand topic (`live_now`) to a full destination
/// (`/topic/live_now`). Destinations that already start with `/` are kept.
pub fn normalize_destination(topic: &str) -> String {
    let topic = topic.trim();
    if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("{}{}", TOPIC_PREFIX, topic)
    }
}

/// Strip the `/topic/` prefix for display, leaving other destinations intact
pub fn shorthand_topic(destination: &str) -> &str {
    destination.strip_prefix(TOPIC_PREFIX).unwrap_or(destination)
}
