//! Live telemetry channel
//!
//! A [`LiveTelemetryChannel`] owns at most one broker session at a time. The
//! session runs as a tokio task that connects, performs the STOMP handshake,
//! subscribes, and streams messages until the socket drops, at which point
//! it waits the fixed reconnect delay and starts over. `close()` signals the
//! task and bumps the channel out of the session's generation, so anything
//! the task does afterwards is discarded.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use url::Url;

use super::endpoint::{origin_is_secure, resolve_endpoint};
use super::error::{ChannelError, EndpointError, TransportError};
use super::payload::TelemetryPayload;
use super::state::ChannelState;
use super::transport::{Connection, Transport, WsTransport};
use crate::config::ChannelConfig;
use crate::stomp::{self, decode_message, Command, Frame, HeartBeat, Inbound};

/// The channel holds a single subscription per session
const SUBSCRIPTION_ID: &str = "sub-0";

/// Upper bound for the UNSUBSCRIBE/DISCONNECT exchange on close
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Handle returned by [`LiveTelemetryChannel::on_payload`]
pub type CallbackId = u64;

type PayloadCallback = Arc<dyn Fn(&TelemetryPayload) + Send + Sync>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the channel handle and its session task
struct Shared {
    /// Generation of the running session; `None` while closed
    active: Mutex<Option<u64>>,
    state_tx: watch::Sender<ChannelState>,
    latest_tx: watch::Sender<Option<TelemetryPayload>>,
    callbacks: Mutex<Vec<(CallbackId, PayloadCallback)>>,
    next_callback: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (latest_tx, _) = watch::channel(None);

        Self {
            active: Mutex::new(None),
            state_tx,
            latest_tx,
            callbacks: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        *lock(&self.active) == Some(generation)
    }

    /// Move to `state` if `generation` is still the running session
    fn transition(&self, generation: u64, state: ChannelState) -> bool {
        let active = lock(&self.active);
        if *active != Some(generation) {
            return false;
        }

        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Channel state changed");
        }
        true
    }

    fn add_callback(&self, callback: PayloadCallback) -> CallbackId {
        let id = self.next_callback.fetch_add(1, Ordering::Relaxed);
        lock(&self.callbacks).push((id, callback));
        id
    }

    /// Publish a payload and fan it out to every registered callback
    fn deliver(&self, generation: u64, payload: TelemetryPayload) {
        {
            let active = lock(&self.active);
            if *active != Some(generation) {
                return;
            }
            self.latest_tx.send_replace(Some(payload.clone()));
        }

        // Snapshot so callbacks may register or remove callbacks themselves
        let callbacks: Vec<PayloadCallback> = lock(&self.callbacks)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if !self.is_current(generation) {
                break;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(&payload))).is_err() {
                tracing::error!(topic = %payload.topic(), "Payload callback panicked");
            }
        }
    }
}

struct Session {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A reconnecting subscription to one broker topic
pub struct LiveTelemetryChannel {
    config: ChannelConfig,
    endpoint: Result<Url, EndpointError>,
    destination: String,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
    /// Task of the last closed session, until it has released its socket
    retired: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    observers: Mutex<usize>,
}

impl LiveTelemetryChannel {
    /// Create a channel that connects over WebSocket
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    /// Create a channel over a custom transport.
    ///
    /// The endpoint is resolved here, once. A bad endpoint is reported by
    /// every later `open()`.
    pub fn with_transport(config: ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        let secure = origin_is_secure(config.origin.as_deref());
        let endpoint = resolve_endpoint(config.endpoint_url.as_deref(), secure);
        if let Err(e) = &endpoint {
            tracing::warn!(error = %e, "Live channel endpoint is unusable");
        }

        let destination = stomp::normalize_destination(&config.topic);

        Self {
            config,
            endpoint,
            destination,
            transport,
            shared: Arc::new(Shared::new()),
            session: Mutex::new(None),
            retired: Mutex::new(None),
            generation: AtomicU64::new(0),
            observers: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// The resolved endpoint, after any secure-origin upgrade
    pub fn endpoint(&self) -> Result<&Url, &EndpointError> {
        self.endpoint.as_ref()
    }

    /// Full destination subscribed to (e.g. `/topic/live_now`)
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Start the session. No-op while one is already running.
    ///
    /// Clears the latest payload. Must be called from within a tokio runtime.
    pub fn open(&self) -> Result<(), ChannelError> {
        let url = self.endpoint.clone()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let mut session = lock(&self.session);
        if session.is_some() {
            tracing::trace!(topic = %self.destination, "Live channel already open");
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut active = lock(&self.shared.active);
            *active = Some(generation);
            self.shared.latest_tx.send_replace(None);
            self.shared.state_tx.send_replace(ChannelState::Connecting);
        }

        let ctx = SessionContext {
            generation,
            url: url.clone(),
            destination: self.destination.clone(),
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let previous = lock(&self.retired).take();
        let task = runtime.spawn(ctx.run(shutdown_rx, previous));

        *session = Some(Session {
            shutdown: shutdown_tx,
            task,
        });

        tracing::info!(
            endpoint = %url,
            topic = %self.destination,
            generation,
            "Live channel opened"
        );
        Ok(())
    }

    /// Stop the session and cancel any pending reconnect.
    ///
    /// Safe to call repeatedly and before `open()`. The session task finishes
    /// in the background; use [`shutdown`](Self::shutdown) to wait for it. A
    /// later `open()` does not connect until that task has released its socket.
    pub fn close(&self) {
        if let Some(session) = self.detach() {
            let _ = session.shutdown.send(());
            *lock(&self.retired) = Some(session.task);
            tracing::info!(topic = %self.destination, "Live channel closed");
        }
    }

    /// Like [`close`](Self::close), but waits until the socket is released
    pub async fn shutdown(&self) {
        let retired = lock(&self.retired).take();
        if let Some(task) = retired {
            let _ = task.await;
        }

        if let Some(session) = self.detach() {
            let _ = session.shutdown.send(());
            if let Err(e) = session.task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Live session task panicked");
                }
            }
            tracing::info!(topic = %self.destination, "Live channel shut down");
        }
    }

    fn detach(&self) -> Option<Session> {
        let mut session = lock(&self.session);
        let taken = session.take()?;

        let mut active = lock(&self.shared.active);
        *active = None;
        self.shared.state_tx.send_replace(ChannelState::Disconnected);

        Some(taken)
    }

    /// Register a callback for every decoded message.
    ///
    /// Late registrations see only future messages. Callbacks run on the
    /// session task and should return quickly.
    pub fn on_payload<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TelemetryPayload) + Send + Sync + 'static,
    {
        self.shared.add_callback(Arc::new(callback))
    }

    /// Unregister a callback. Returns false if the id was unknown.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = lock(&self.shared.callbacks);
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Last decoded payload, or `None` if nothing arrived since the last `open()`
    pub fn latest(&self) -> Option<TelemetryPayload> {
        self.shared.latest_tx.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    pub fn watch_latest(&self) -> watch::Receiver<Option<TelemetryPayload>> {
        self.shared.latest_tx.subscribe()
    }

    /// Acquire a scoped view. The channel opens with the first view and
    /// closes when the last view is dropped.
    pub fn observe(self: &Arc<Self>) -> Result<LiveView, ChannelError> {
        let mut observers = lock(&self.observers);
        self.open()?;
        *observers += 1;

        Ok(LiveView {
            channel: Arc::clone(self),
            latest: self.watch_latest(),
        })
    }

    pub fn observer_count(&self) -> usize {
        *lock(&self.observers)
    }

    fn release_observer(&self) {
        let mut observers = lock(&self.observers);
        *observers = observers.saturating_sub(1);
        if *observers == 0 {
            self.close();
        }
    }
}

impl Drop for LiveTelemetryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Scoped observer of a [`LiveTelemetryChannel`]
pub struct LiveView {
    channel: Arc<LiveTelemetryChannel>,
    latest: watch::Receiver<Option<TelemetryPayload>>,
}

impl LiveView {
    pub fn latest(&self) -> Option<TelemetryPayload> {
        self.latest.borrow().clone()
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn channel(&self) -> &Arc<LiveTelemetryChannel> {
        &self.channel
    }

    /// Wait for the next payload.
    ///
    /// This tracks the latest value, so payloads arriving faster than the
    /// caller polls are coalesced. Use `on_payload` to see every message.
    pub async fn next_payload(&mut self) -> Option<TelemetryPayload> {
        loop {
            if self.latest.changed().await.is_err() {
                return None;
            }
            if let Some(payload) = self.latest.borrow_and_update().clone() {
                return Some(payload);
            }
        }
    }
}

impl Drop for LiveView {
    fn drop(&mut self) {
        self.channel.release_observer();
    }
}

/// Why a connection ended without a `close()`
#[derive(Debug, Error)]
enum ConnectionLost {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection closed by broker")]
    Closed,

    #[error("no CONNECTED frame within {0:?}")]
    ConnectTimeout(Duration),

    #[error("no data from broker within {0:?}")]
    HeartbeatTimeout(Duration),
}

enum SessionEnd {
    Shutdown,
    Lost(ConnectionLost),
}

/// Everything the session task needs, detached from the channel handle
struct SessionContext {
    generation: u64,
    url: Url,
    destination: String,
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
}

impl SessionContext {
    async fn run(self, mut shutdown: oneshot::Receiver<()>, previous: Option<JoinHandle<()>>) {
        // At most one socket per channel. A closed session is bounded by
        // DISCONNECT_GRACE, so wait for it before connecting.
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let delay = self.config.reconnect_delay();
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            tracing::debug!(endpoint = %self.url, attempt, "Connecting to broker");

            let lost = match self.run_connection(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => reason,
            };

            if !self.shared.transition(self.generation, ChannelState::Reconnecting) {
                break;
            }
            tracing::warn!(
                endpoint = %self.url,
                error = %lost,
                retry_in_ms = delay.as_millis() as u64,
                "Live connection lost"
            );

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!(generation = self.generation, "Live session finished");
    }

    /// One connection from socket open to loss or shutdown
    async fn run_connection(&self, shutdown: &mut oneshot::Receiver<()>) -> SessionEnd {
        let connected = tokio::select! {
            biased;
            _ = &mut *shutdown => None,
            result = self.transport.connect(&self.url) => Some(result),
        };
        let mut conn = match connected {
            None => return SessionEnd::Shutdown,
            Some(Err(e)) => return SessionEnd::Lost(e.into()),
            Some(Ok(conn)) => conn,
        };

        let client_beat = HeartBeat::new(
            self.config.heartbeat_outgoing_ms,
            self.config.heartbeat_incoming_ms,
        );

        let handshake = tokio::select! {
            biased;
            _ = &mut *shutdown => None,
            result = self.handshake(conn.as_mut(), client_beat) => Some(result),
        };
        let server_beat = match handshake {
            None => {
                close_quietly(conn.as_mut()).await;
                return SessionEnd::Shutdown;
            }
            Some(Err(lost)) => return SessionEnd::Lost(lost),
            Some(Ok(beat)) => beat,
        };

        if !self.shared.is_current(self.generation) {
            close_quietly(conn.as_mut()).await;
            return SessionEnd::Shutdown;
        }
        if let Err(e) = conn
            .send(Frame::subscribe(SUBSCRIPTION_ID, &self.destination).encode())
            .await
        {
            return SessionEnd::Lost(e.into());
        }
        if !self.shared.transition(self.generation, ChannelState::Connected) {
            self.disconnect(conn.as_mut()).await;
            return SessionEnd::Shutdown;
        }
        tracing::info!(endpoint = %self.url, topic = %self.destination, "Live channel connected");

        self.stream(conn.as_mut(), shutdown, client_beat, server_beat)
            .await
    }

    /// Send CONNECT and wait for CONNECTED; returns the broker's heart-beat
    async fn handshake(
        &self,
        conn: &mut dyn Connection,
        client_beat: HeartBeat,
    ) -> Result<HeartBeat, ConnectionLost> {
        let host = self.url.host_str().unwrap_or_default();
        conn.send(Frame::connect(host, client_beat).encode()).await?;

        let wait = async {
            loop {
                let text = match conn.recv().await {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => return Err(ConnectionLost::Transport(e)),
                    None => return Err(ConnectionLost::Closed),
                };

                let items = match decode_message(&text) {
                    Ok(items) => items,
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding malformed STOMP frame");
                        continue;
                    }
                };

                for item in items {
                    match item {
                        Inbound::Frame(frame) if frame.command == Command::Connected => {
                            tracing::debug!(
                                version = frame.get("version").unwrap_or("1.0"),
                                server = frame.get("server").unwrap_or("unknown"),
                                "STOMP session established"
                            );
                            return Ok(frame.heart_beat().unwrap_or_default());
                        }
                        Inbound::Frame(frame) if frame.command == Command::Error => {
                            log_error_frame(&frame)
                        }
                        Inbound::Frame(frame) => {
                            tracing::debug!(command = %frame.command, "Ignoring frame before CONNECTED")
                        }
                        Inbound::HeartBeat => {}
                    }
                }
            }
        };

        match self.config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| ConnectionLost::ConnectTimeout(limit))?,
            None => wait.await,
        }
    }

    /// Read messages and exchange heart-beats until the connection ends
    async fn stream(
        &self,
        conn: &mut dyn Connection,
        shutdown: &mut oneshot::Receiver<()>,
        client_beat: HeartBeat,
        server_beat: HeartBeat,
    ) -> SessionEnd {
        enum Event {
            Shutdown,
            Inbound(Option<Result<String, TransportError>>),
            Beat,
            Silent,
        }

        let (send_every, expect_within) = HeartBeat::negotiate(client_beat, server_beat);
        // Same tolerance the dashboard's STOMP client applies
        let silence_limit = expect_within.map(|d| d * 2);

        let mut beats = send_every.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut last_seen = Instant::now();

        loop {
            let deadline = silence_limit.map(|limit| last_seen + limit);

            let event = tokio::select! {
                biased;
                _ = &mut *shutdown => Event::Shutdown,
                msg = conn.recv() => Event::Inbound(msg),
                _ = next_tick(&mut beats) => Event::Beat,
                _ = sleep_until(deadline) => Event::Silent,
            };

            match event {
                Event::Shutdown => {
                    self.disconnect(conn).await;
                    return SessionEnd::Shutdown;
                }
                Event::Inbound(None) => return SessionEnd::Lost(ConnectionLost::Closed),
                Event::Inbound(Some(Err(e))) => return SessionEnd::Lost(e.into()),
                Event::Inbound(Some(Ok(text))) => {
                    last_seen = Instant::now();
                    self.handle_text(&text);
                }
                Event::Beat => {
                    if let Err(e) = conn.send("\n".to_string()).await {
                        return SessionEnd::Lost(e.into());
                    }
                }
                Event::Silent => {
                    return SessionEnd::Lost(ConnectionLost::HeartbeatTimeout(
                        silence_limit.unwrap_or_default(),
                    ))
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let items = match decode_message(text) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed STOMP frame");
                return;
            }
        };

        for item in items {
            match item {
                Inbound::Frame(frame) => self.handle_frame(frame),
                Inbound::HeartBeat => tracing::trace!("Broker heart-beat"),
            }
        }
    }

    fn handle_frame(&self, frame: Frame) {
        match frame.command {
            Command::Message => {
                let ours = frame.get("subscription") == Some(SUBSCRIPTION_ID)
                    || frame.get("destination") == Some(self.destination.as_str());
                if !ours {
                    tracing::debug!(
                        destination = frame.get("destination").unwrap_or(""),
                        "Ignoring message for another subscription"
                    );
                    return;
                }

                let topic = stomp::shorthand_topic(&self.destination);
                match TelemetryPayload::parse(topic, &frame.body) {
                    Ok(payload) => self.shared.deliver(self.generation, payload),
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Failed to parse live update")
                    }
                }
            }
            Command::Error => log_error_frame(&frame),
            Command::Receipt => {
                tracing::trace!(receipt = frame.get("receipt-id").unwrap_or(""), "Receipt")
            }
            other => tracing::debug!(command = %other, "Ignoring unexpected frame"),
        }
    }

    /// Best-effort UNSUBSCRIBE + DISCONNECT, then close the socket
    async fn disconnect(&self, conn: &mut dyn Connection) {
        let graceful = async {
            let _ = conn.send(Frame::unsubscribe(SUBSCRIPTION_ID).encode()).await;
            let _ = conn.send(Frame::disconnect().encode()).await;
            conn.close().await;
        };

        if tokio::time::timeout(DISCONNECT_GRACE, graceful).await.is_err() {
            tracing::debug!(endpoint = %self.url, "Broker did not take DISCONNECT in time");
        }
    }
}

async fn close_quietly(conn: &mut dyn Connection) {
    let _ = tokio::time::timeout(DISCONNECT_GRACE, conn.close()).await;
}

fn log_error_frame(frame: &Frame) {
    tracing::error!(
        broker_message = frame.get("message").unwrap_or(""),
        body = %frame.body,
        "STOMP error"
    );
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
