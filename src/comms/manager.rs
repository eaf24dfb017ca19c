//! Connectivity worker and its read-side handle
//!
//! # State Machine
//!
//! ```text
//!                 id + network ready
//! Disconnected ─────────────────────► Connecting
//!      ▲                                  │
//!      │  connect / subscribe failed      │ handshake + SUBACK
//!      ├──────────────────────────────────┤
//!      │                                  ▼
//!      └──────── disconnect ─────────  Connected
//! ```
//!
//! # Ownership
//!
//! [`CommsManager`] is the only writer of the connection state and the topic
//! set. It publishes both through a `watch` channel; every [`CommsHandle`]
//! only reads from it. A handle that sees `Connected` a moment before the
//! worker tears the session down publishes into a dead client, which the
//! engine reports as an error and the handle drops. Outbound traffic is
//! fire-and-forget either way.

use super::buffer::OutputBuffer;
use super::engine::{ConnectSettings, MessageChunk, ProtocolEngine, Publisher, QoS, WaitOutcome};
use super::identity::{IdentityStore, NetworkProbe};
use super::message::{CommsEvent, InboundMessage, SectorWrite};
use super::topics::{TopicBinder, TopicSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Broker and timing settings of the worker
#[derive(Debug, Clone)]
pub struct CommsSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    /// Delivery guarantee for subscriptions and sector writes
    pub qos: QoS,
    /// How long one inbound wait blocks
    pub wait_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Pause between connection attempts
    pub reconnect_backoff: Duration,
    pub request_capacity: usize,
}

impl Default for CommsSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            credentials: None,
            keep_alive: Duration::from_secs(60),
            qos: QoS::AtLeastOnce,
            wait_timeout: Duration::from_millis(3000),
            handshake_timeout: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(2),
            request_capacity: 100,
        }
    }
}

impl CommsSettings {
    fn connect_settings(&self, client_id: &str) -> ConnectSettings {
        ConnectSettings {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            client_id: client_id.to_string(),
            credentials: self.credentials.clone(),
            keep_alive: self.keep_alive,
            handshake_timeout: self.handshake_timeout,
            request_capacity: self.request_capacity,
        }
    }
}

/// Live session as seen by the handles
struct SessionLink {
    topics: TopicSet,
    publisher: Arc<dyn Publisher>,
    qos: QoS,
}

#[derive(Clone, Default)]
struct SessionView {
    state: ConnectionState,
    link: Option<Arc<SessionLink>>,
}

#[derive(Debug, Default)]
struct CommsStats {
    messages_received: AtomicUsize,
    messages_sent: AtomicUsize,
    connects: AtomicUsize,
}

/// Snapshot of the remote channel for status displays
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommsStatus {
    pub connection_state: ConnectionState,
    pub channel_id: Option<u32>,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub connects: usize,
}

/// Owns the connectivity context and runs the connect/subscribe/wait loop
pub struct CommsManager<E, I, N> {
    engine: E,
    identity: I,
    probe: N,
    settings: CommsSettings,
    binder: TopicBinder,
    state: ConnectionState,
    session_tx: watch::Sender<SessionView>,
    events: mpsc::Sender<CommsEvent>,
    stats: Arc<CommsStats>,
}

impl<E, I, N> CommsManager<E, I, N>
where
    E: ProtocolEngine,
    I: IdentityStore + 'static,
    N: NetworkProbe + 'static,
{
    /// Creates the worker and the first handle onto it.
    ///
    /// `events` receives state changes, the connected notification and
    /// inbound messages; the worker waits for room in it, so it has to be
    /// drained.
    pub fn new(
        engine: E,
        identity: I,
        probe: N,
        settings: CommsSettings,
        events: mpsc::Sender<CommsEvent>,
    ) -> (Self, CommsHandle) {
        let (session_tx, session_rx) = watch::channel(SessionView::default());
        let stats = Arc::new(CommsStats::default());

        let handle = CommsHandle {
            session: session_rx,
            stats: stats.clone(),
        };

        let manager = Self {
            engine,
            identity,
            probe,
            settings,
            binder: TopicBinder::new(),
            state: ConnectionState::Disconnected,
            session_tx,
            events,
            stats,
        };

        (manager, handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topics(&self) -> Option<&TopicSet> {
        self.binder.active()
    }

    /// Runs the worker in a tokio task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Worker loop. Sleeps the reconnect backoff after every cycle that ends
    /// without a session; a live session loops straight back into the next
    /// inbound wait.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Connectivity worker started for {}:{}",
            self.settings.host, self.settings.port
        );

        loop {
            let state = tokio::select! {
                _ = cancel.cancelled() => break,
                state = self.step() => state,
            };

            if state != ConnectionState::Connected {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.reconnect_backoff) => {}
                }
            }
        }

        if self.state != ConnectionState::Disconnected {
            self.teardown().await;
        }
        info!("Connectivity worker stopped");
    }

    /// One cycle of the loop, without the backoff sleep
    pub async fn step(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Connected {
            match self.engine.wait_for_message(self.settings.wait_timeout).await {
                WaitOutcome::Message(chunk) => self.deliver(chunk).await,
                WaitOutcome::Idle => {}
                WaitOutcome::Disconnected(reason) => {
                    warn!("Connection lost: {}", reason);
                    self.teardown().await;
                }
            }
        } else {
            self.try_connect().await;
        }
        self.state
    }

    async fn try_connect(&mut self) {
        let Some(channel_id) = self.identity.read_channel_id() else {
            debug!("No channel id available, skipping connection attempt");
            return;
        };
        if !self.probe.is_ready().await {
            debug!("Network not ready, skipping connection attempt");
            return;
        }

        self.set_state(ConnectionState::Connecting, None).await;

        let topics = self.binder.derive_topics(channel_id).clone();
        let connect = self.settings.connect_settings(&topics.client_id);

        let publisher = match self.engine.connect(&connect).await {
            Ok(publisher) => publisher,
            Err(e) => {
                warn!("Retry network connect error: {}", e);
                self.teardown().await;
                return;
            }
        };

        let subscriptions = topics
            .subscriptions()
            .iter()
            .map(|topic| topic.to_string())
            .collect();
        if let Err(e) = self.engine.subscribe(subscriptions, self.settings.qos).await {
            warn!("Subscribe failed: {}", e);
            self.teardown().await;
            return;
        }

        let publisher: Arc<dyn Publisher> = Arc::new(publisher);
        let link = Arc::new(SessionLink {
            topics,
            publisher,
            qos: self.settings.qos,
        });

        self.stats.connects.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Connected, Some(link)).await;
        info!("Connected on channel {}", channel_id);
        self.emit(CommsEvent::Connected { channel_id }).await;
    }

    /// Only the first chunk of a message is passed on
    async fn deliver(&mut self, chunk: MessageChunk) {
        if !chunk.first {
            debug!("Skipping continuation chunk on {}", chunk.topic);
            return;
        }

        let kind = self.binder.classify_topic(&chunk.topic);
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Inbound {} message on {} ({} bytes)",
            kind,
            chunk.topic,
            chunk.payload.len()
        );
        self.emit(CommsEvent::Message(InboundMessage::new(
            kind,
            chunk.topic,
            chunk.payload,
        )))
        .await;
    }

    async fn teardown(&mut self) {
        // handles stop publishing before the client goes away
        self.set_state(ConnectionState::Disconnected, None).await;
        self.engine.disconnect().await;
        self.binder.clear();
    }

    async fn set_state(&mut self, state: ConnectionState, link: Option<Arc<SessionLink>>) {
        self.session_tx.send_replace(SessionView { state, link });

        if self.state == state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state;
        self.emit(CommsEvent::StateChanged(state)).await;
    }

    async fn emit(&mut self, event: CommsEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Cloneable read-side view of the worker with the outbound operations.
///
/// Every outbound call is a silent no-op unless the worker currently reports
/// a live session.
#[derive(Clone)]
pub struct CommsHandle {
    session: watch::Receiver<SessionView>,
    stats: Arc<CommsStats>,
}

impl CommsHandle {
    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Topic set of the live session
    pub fn topics(&self) -> Option<TopicSet> {
        self.live_link().map(|link| link.topics.clone())
    }

    pub fn stats(&self) -> CommsStatus {
        let session = self.session.borrow();
        CommsStatus {
            connection_state: session.state,
            channel_id: session.link.as_ref().map(|link| link.topics.channel_id()),
            messages_received: self.stats.messages_received.load(Ordering::Relaxed),
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            connects: self.stats.connects.load(Ordering::Relaxed),
        }
    }

    /// Console data, lowest delivery guarantee
    pub fn publish(&self, payload: &[u8]) {
        self.publish_console(payload.to_vec());
    }

    /// Raw bytes onto the console topic
    pub fn queue_message(&self, data: &[u8]) {
        self.publish(data);
    }

    /// Asks the disk service for the sector at `offset`
    pub fn request_sector_read(&self, offset: u32) {
        if let Some(link) = self.live_link() {
            self.send(
                &link,
                &link.topics.vdisk_read,
                QoS::AtMostOnce,
                offset.to_le_bytes().to_vec(),
            );
        }
    }

    /// Sends a sector to the disk service at the session's delivery guarantee
    pub fn request_sector_write(&self, write: &SectorWrite) {
        if let Some(link) = self.live_link() {
            self.send(&link, &link.topics.vdisk_write, link.qos, write.to_bytes());
        }
    }

    /// Character batcher publishing through this handle
    pub fn console(&self, capacity: usize) -> ConsoleOutput {
        ConsoleOutput {
            handle: self.clone(),
            buffer: OutputBuffer::with_capacity(capacity),
        }
    }

    fn publish_console(&self, payload: Vec<u8>) {
        if let Some(link) = self.live_link() {
            self.send(&link, &link.topics.console_data, QoS::AtMostOnce, payload);
        }
    }

    fn live_link(&self) -> Option<Arc<SessionLink>> {
        let session = self.session.borrow();
        if session.state != ConnectionState::Connected {
            return None;
        }
        session.link.clone()
    }

    fn send(&self, link: &SessionLink, topic: &str, qos: QoS, payload: Vec<u8>) {
        match link.publisher.publish(topic, qos, payload) {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => debug!("Dropped outbound message: {}", e),
        }
    }
}

/// Batches console characters for one producer.
///
/// Owned by the loop that produces output; it is not shared.
pub struct ConsoleOutput {
    handle: CommsHandle,
    buffer: OutputBuffer,
}

impl ConsoleOutput {
    pub fn append_character(&mut self, character: u8) {
        if let Some(batch) = self.buffer.push(character) {
            self.handle.publish_console(batch);
        }
    }

    /// Publishes any partial batch; safe to call on every idle tick
    pub fn flush_pending(&mut self) {
        if let Some(batch) = self.buffer.take_pending() {
            self.handle.publish_console(batch);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.buffer.is_dirty()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
