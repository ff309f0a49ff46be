//! In-memory broker for channel tests

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

use super::error::TransportError;
use super::live::lock;
use super::transport::{Connection, Transport};
use crate::config::LIVE_TOPIC;
use crate::stomp::{decode_message, Command, Frame, Inbound};

/// A MESSAGE frame as the broker would send it for subscription `sub-0`
pub(crate) fn message_frame(destination: &str, body: &str) -> String {
    format!(
        "MESSAGE\ndestination:{}\nsubscription:sub-0\nmessage-id:1\ncontent-type:application/json\n\n{}\0",
        destination, body
    )
}

/// Transport whose connections terminate at a [`MockBroker`]
pub(crate) struct MockTransport {
    attempts: AtomicUsize,
    refuse: AtomicUsize,
    close_delay_ms: AtomicU64,
    open: Arc<AtomicUsize>,
    peak_open: AtomicUsize,
    urls: Mutex<Vec<String>>,
    accepted: UnboundedSender<BrokerConn>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, MockBroker) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            attempts: AtomicUsize::new(0),
            refuse: AtomicUsize::new(0),
            close_delay_ms: AtomicU64::new(0),
            open: Arc::new(AtomicUsize::new(0)),
            peak_open: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            accepted,
        });
        (transport, MockBroker { incoming })
    }

    /// Fail the next `n` connection attempts
    pub(crate) fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Make `Connection::close` take this long
    pub(crate) fn set_close_delay(&self, delay: Duration) {
        self.close_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Most client connections ever alive at the same time
    pub(crate) fn peak_connections(&self) -> usize {
        self.peak_open.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        lock(&self.urls).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.urls).push(url.to_string());

        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_broker, from_client) = mpsc::unbounded_channel();
        let (to_client, from_broker) = mpsc::unbounded_channel();
        let _ = self.accepted.send(BrokerConn {
            from_client,
            to_client,
        });

        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_open.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(MockConnection {
            to_broker,
            from_broker,
            close_delay: Duration::from_millis(self.close_delay_ms.load(Ordering::SeqCst)),
            open: Arc::clone(&self.open),
        }))
    }
}

struct MockConnection {
    to_broker: UnboundedSender<String>,
    from_broker: UnboundedReceiver<String>,
    close_delay: Duration,
    open: Arc<AtomicUsize>,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.to_broker
            .send(text)
            .map_err(|_| TransportError::Send("broker went away".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.from_broker.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
    }
}

/// Receives the connections opened through a [`MockTransport`]
pub(crate) struct MockBroker {
    incoming: UnboundedReceiver<BrokerConn>,
}

impl MockBroker {
    pub(crate) async fn accept(&mut self) -> BrokerConn {
        self.incoming.recv().await.expect("transport dropped")
    }
}

/// Broker side of one connection. Dropping it drops the connection.
pub(crate) struct BrokerConn {
    from_client: UnboundedReceiver<String>,
    to_client: UnboundedSender<String>,
}

impl BrokerConn {
    /// Next raw message from the client, heart-beats included
    pub(crate) async fn recv_raw(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame from the client, skipping heart-beats
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let text = self.from_client.recv().await?;
            for item in decode_message(&text).expect("client sent a malformed frame") {
                if let Inbound::Frame(frame) = item {
                    return Some(frame);
                }
            }
        }
    }

    /// Every frame the client sends until it drops the connection
    pub(crate) async fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    pub(crate) fn send(&self, text: &str) {
        let _ = self.to_client.send(text.to_string());
    }

    pub(crate) fn connected(&self) {
        self.send("CONNECTED\nversion:1.2\nserver:mock/1.0\nheart-beat:0,0\n\n\0");
    }

    pub(crate) fn message(&self, body: &str) {
        self.send(&message_frame(LIVE_TOPIC, body));
    }

    /// Accept CONNECT, answer CONNECTED, and return the SUBSCRIBE frame
    pub(crate) async fn handshake(&mut self) -> Frame {
        let connect = self.next_frame().await.expect("no CONNECT");
        assert_eq!(connect.command, Command::Connect);
        self.connected();

        let subscribe = self.next_frame().await.expect("no SUBSCRIBE");
        assert_eq!(subscribe.command, Command::Subscribe);
        subscribe
    }
}
