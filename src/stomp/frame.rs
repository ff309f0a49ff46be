//! STOMP frame encoding and decoding
//!
//! A frame is a command line, zero or more `name:value` header lines, a blank
//! line, and a body terminated by a NUL octet. Header values are escaped per
//! STOMP 1.2 in every frame except CONNECT and CONNECTED.

use std::fmt;
use std::time::Duration;

use super::error::{FrameError, FrameResult};

/// Frame commands used by a read-only subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client frames
    Connect,
    Subscribe,
    Unsubscribe,
    Disconnect,
    // Server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> FrameResult<Self> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "DISCONNECT" => Ok(Command::Disconnect),
            "CONNECTED" => Ok(Command::Connected),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            "" => Err(FrameError::MissingCommand),
            other => Err(FrameError::UnknownCommand(other.to_string())),
        }
    }

    /// CONNECT and CONNECTED carry raw header values for 1.0 compatibility
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and an empty body
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Builder method: append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Builder method: set the body
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame offering all supported versions
    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", super::ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", heart_beat.to_string())
    }

    /// SUBSCRIBE frame with automatic acknowledgement
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Heart-beat settings advertised by this frame, if any
    pub fn heart_beat(&self) -> Option<HeartBeat> {
        self.get("heart-beat").and_then(HeartBeat::parse)
    }

    /// Serialize to wire text, including the trailing NUL
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// An item decoded from one WebSocket text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A bare end-of-line keepalive
    HeartBeat,
    Frame(Frame),
}

/// Heart-beat intervals in milliseconds; 0 means "not supported"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send heart-beats
    pub outgoing_ms: u64,
    /// Desired interval at which this side wants to receive heart-beats
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Parse a `cx,cy` header value
    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: out.trim().parse().ok()?,
            incoming_ms: inc.trim().parse().ok()?,
        })
    }

    /// Agree on intervals between this client and the broker.
    ///
    /// Returns `(send_every, expect_within)`. Each side is `None` when either
    /// party disabled it.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let send = if client.outgoing_ms > 0 && server.incoming_ms > 0 {
            Some(Duration::from_millis(client.outgoing_ms.max(server.incoming_ms)))
        } else {
            None
        };

        let expect = if client.incoming_ms > 0 && server.outgoing_ms > 0 {
            Some(Duration::from_millis(client.incoming_ms.max(server.outgoing_ms)))
        } else {
            None
        };

        (send, expect)
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// Decode every frame and heart-beat contained in one WebSocket message.
///
/// Brokers may batch several frames into one message and may pad frames with
/// trailing EOLs; both are accepted.
pub fn decode_message(text: &str) -> FrameResult<Vec<Inbound>> {
    let mut rest = text;
    let mut items = Vec::new();

    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) {
            items.push(Inbound::HeartBeat);
            rest = r;
            continue;
        }

        let (frame, r) = decode_frame(rest)?;
        items.push(Inbound::Frame(frame));
        rest = r;
    }

    Ok(items)
}

/// Decode one frame, returning it with the unconsumed remainder
fn decode_frame(input: &str) -> FrameResult<(Frame, &str)> {
    let (command_line, mut rest) = next_line(input).ok_or(FrameError::Unterminated)?;
    let command = Command::parse(command_line)?;
    let escaped = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, r) = next_line(rest).ok_or(FrameError::Unterminated)?;
        rest = r;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;

        if escaped {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let (body, rest) = match content_length {
        Some(len) => {
            if len > rest.len() || !rest.is_char_boundary(len) {
                return Err(FrameError::InvalidContentLength(len.to_string()));
            }
            let (body, tail) = rest.split_at(len);
            let tail = tail.strip_prefix('\0').ok_or(FrameError::Unterminated)?;
            (body, tail)
        }
        None => {
            let nul = rest.find('\0').ok_or(FrameError::Unterminated)?;
            (&rest[..nul], &rest[nul + 1..])
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };

    Ok((frame, rest))
}

/// Split off one line, accepting both `\n` and `\r\n` endings
fn next_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = &s[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &s[idx + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> FrameResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(text: &str) -> Frame {
        let items = decode_message(text).unwrap();
        match items.as_slice() {
            [Inbound::Frame(frame)] => frame.clone(),
            other => panic!("expected one frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_subscribe() {
        let frame = Frame::subscribe("sub-0", "/topic/live_now");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/live_now\nack:auto\n\n\0"
        );
    }

    #[test]
    fn test_encode_connect_does_not_escape() {
        let frame = Frame::connect("api.hydroleaf.se", HeartBeat::new(10000, 10000));
        let text = frame.encode();
        assert!(text.starts_with("CONNECT\n"));
        assert!(text.contains("accept-version:1.2,1.1,1.0\n"));
        assert!(text.contains("host:api.hydroleaf.se\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn test_decode_message_frame() {
        let frame = single(
            "MESSAGE\ndestination:/topic/live_now\nmessage-id:7\nsubscription:sub-0\n\n{\"ph\":6.1}\0",
        );
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/live_now"));
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.body, "{\"ph\":6.1}");
    }

    #[test]
    fn test_decode_crlf_and_trailing_eols() {
        let items = decode_message("CONNECTED\r\nversion:1.2\r\n\r\n\0\n\n").unwrap();
        assert_eq!(items.len(), 3);
        match &items[0] {
            Inbound::Frame(f) => {
                assert_eq!(f.command, Command::Connected);
                assert_eq!(f.get("version"), Some("1.2"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(items[1], Inbound::HeartBeat);
        assert_eq!(items[2], Inbound::HeartBeat);
    }

    #[test]
    fn test_decode_heartbeat_only() {
        assert_eq!(decode_message("\n").unwrap(), vec![Inbound::HeartBeat]);
        assert!(decode_message("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_batched_frames() {
        let text = "RECEIPT\nreceipt-id:1\n\n\0MESSAGE\ndestination:/topic/a\n\nx\0";
        let items = decode_message(text).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_content_length_allows_embedded_nul() {
        let frame = single("MESSAGE\ncontent-length:3\n\na\0b\0");
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn test_header_unescaping() {
        let frame = single("ERROR\nmessage:bad\\cvalue\\nhere\n\n\0");
        assert_eq!(frame.get("message"), Some("bad:value\nhere"));

        // CONNECTED keeps raw values
        let frame = single("CONNECTED\nserver:a\\cb\n\n\0");
        assert_eq!(frame.get("server"), Some("a\\cb"));
    }

    #[test]
    fn test_header_escape_encode() {
        let frame = Frame::new(Command::Subscribe).header("destination", "/a:b");
        assert!(frame.encode().contains("destination:/a\\cb\n"));
    }

    #[test]
    fn test_repeated_header_first_wins() {
        let frame = single("MESSAGE\nfoo:1\nfoo:2\n\n\0");
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            decode_message("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".to_string()))
        );
        // Servers never send the client-only STOMP command
        assert_eq!(
            decode_message("STOMP\naccept-version:1.2\n\n\0"),
            Err(FrameError::UnknownCommand("STOMP".to_string()))
        );
        assert_eq!(
            decode_message("MESSAGE\nnocolon\n\n\0"),
            Err(FrameError::MalformedHeader("nocolon".to_string()))
        );
        assert_eq!(
            decode_message("MESSAGE\ndestination:/t\n\nbody"),
            Err(FrameError::Unterminated)
        );
        assert!(matches!(
            decode_message("MESSAGE\ncontent-length:99\n\nab\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
        assert!(matches!(
            decode_message("ERROR\nmessage:bad\\t\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_heart_beat_parse_and_negotiate() {
        assert_eq!(HeartBeat::parse("0,10000"), Some(HeartBeat::new(0, 10000)));
        assert_eq!(HeartBeat::parse("nope"), None);

        let client = HeartBeat::new(10000, 10000);
        let server = HeartBeat::new(20000, 0);
        let (send, expect) = HeartBeat::negotiate(client, server);
        assert_eq!(send, None);
        assert_eq!(expect, Some(Duration::from_millis(20000)));

        let (send, expect) = HeartBeat::negotiate(client, HeartBeat::new(5000, 5000));
        assert_eq!(send, Some(Duration::from_millis(10000)));
        assert_eq!(expect, Some(Duration::from_millis(10000)));
    }
}
