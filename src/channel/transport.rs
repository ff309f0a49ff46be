//! Socket transport
//!
//! The channel speaks STOMP over any ordered, text-message transport. The
//! production implementation is a WebSocket client built on
//! `tokio-tungstenite`; tests substitute an in-memory broker.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::error::TransportError;

/// Opens connections to the broker
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open, bidirectional text-message connection
#[async_trait]
pub trait Connection: Send {
    /// Send one text message
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next text message, or `None` once the peer has closed the connection.
    ///
    /// Must be cancel-safe: the channel races it against timers.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// WebSocket transport over `tokio-tungstenite` (TLS via rustls)
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        if url.scheme() == "wss" {
            // Fails harmlessly once a provider is installed
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(
            endpoint = %url,
            status = %response.status(),
            "WebSocket handshake complete"
        );

        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                // Some brokers frame STOMP as binary messages
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        tracing::warn!(error = %e, len = bytes.len(), "Discarding non-UTF-8 binary message");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "WebSocket closed by broker");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LiveTelemetryChannel;
    use crate::config::ChannelConfig;
    use crate::stomp::{decode_message, Command, Inbound};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_frame_command(
        ws: &mut WebSocketStream<TcpStream>,
    ) -> Option<(Command, Option<String>)> {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                for item in decode_message(text.as_str()).ok()? {
                    if let Inbound::Frame(frame) = item {
                        let dest = frame.get("destination").map(str::to_string);
                        return Some((frame.command, dest));
                    }
                }
            }
        }
        None
    }

    /// Minimal broker: handshake, subscribe, push `messages`, wait for close
    fn spawn_broker(listener: TcpListener, messages: Vec<Message>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();

            let (cmd, _) = next_frame_command(&mut ws).await.unwrap();
            assert_eq!(cmd, Command::Connect);
            ws.send(Message::text("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0"))
                .await
                .unwrap();

            let (cmd, dest) = next_frame_command(&mut ws).await.unwrap();
            assert_eq!(cmd, Command::Subscribe);
            assert_eq!(dest.as_deref(), Some("/topic/live_now"));

            for message in messages {
                ws.send(message).await.unwrap();
            }

            // Wait for the client to go away
            while let Some(Ok(_)) = ws.next().await {}
        })
    }

    async fn local_channel() -> (LiveTelemetryChannel, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ChannelConfig {
            endpoint_url: Some(format!("ws://{}/ws", addr)),
            heartbeat_incoming_ms: 0,
            heartbeat_outgoing_ms: 0,
            ..ChannelConfig::default()
        };
        (LiveTelemetryChannel::new(config), listener)
    }

    fn live_message(body: &[u8]) -> Vec<u8> {
        let mut frame =
            b"MESSAGE\ndestination:/topic/live_now\nsubscription:sub-0\nmessage-id:1\n\n".to_vec();
        frame.extend_from_slice(body);
        frame.push(0);
        frame
    }

    #[tokio::test]
    async fn test_channel_over_real_websocket() {
        let (channel, listener) = local_channel().await;
        let text = String::from_utf8(live_message(br#"{"ph":5.9}"#)).unwrap();
        let broker = spawn_broker(listener, vec![Message::text(text)]);

        let mut latest = channel.watch_latest();
        channel.open().unwrap();

        tokio::time::timeout(Duration::from_secs(10), latest.wait_for(Option::is_some))
            .await
            .expect("payload not received in time")
            .unwrap();

        let payload = channel.latest().unwrap();
        assert_eq!(payload.value(), &json!({"ph": 5.9}));
        assert_eq!(payload.topic(), "live_now");

        channel.shutdown().await;
        tokio::time::timeout(Duration::from_secs(10), broker)
            .await
            .expect("broker did not observe disconnect")
            .unwrap();
    }

    #[tokio::test]
    async fn test_binary_message_must_be_utf8() {
        let (channel, listener) = local_channel().await;
        let broker = spawn_broker(
            listener,
            vec![
                Message::binary(live_message(b"{\"n\":\"\xff\"}")),
                Message::binary(live_message(br#"{"ph":6.1}"#)),
            ],
        );

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        channel.on_payload(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut latest = channel.watch_latest();
        channel.open().unwrap();

        tokio::time::timeout(Duration::from_secs(10), latest.wait_for(Option::is_some))
            .await
            .expect("payload not received in time")
            .unwrap();

        assert_eq!(channel.latest().unwrap().value(), &json!({"ph": 6.1}));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        channel.shutdown().await;
        tokio::time::timeout(Duration::from_secs(10), broker)
            .await
            .expect("broker did not observe disconnect")
            .unwrap();
    }
}
