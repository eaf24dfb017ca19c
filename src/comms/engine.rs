//! Seam between the connectivity worker and the MQTT protocol engine
//!
//! The worker only sequences these calls and reads their outcomes; framing,
//! packet ids, keep-alive and TLS all live behind the trait.

use super::error::CommsError;
use std::future::Future;
use std::time::Duration;

pub use rumqttc::QoS;

/// Everything the engine needs to open a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub keep_alive: Duration,
    pub handshake_timeout: Duration,
    pub request_capacity: usize,
}

/// One piece of an inbound message.
///
/// Engines that deliver a message in several reads mark the first piece with
/// `first` and the final piece with `last`; a message delivered whole has
/// both set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub topic: String,
    pub payload: Vec<u8>,
    pub first: bool,
    pub last: bool,
}

impl MessageChunk {
    pub fn whole(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            first: true,
            last: true,
        }
    }
}

/// Result of waiting for inbound traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Message(MessageChunk),
    /// Timed out or only protocol housekeeping arrived
    Idle,
    /// The transport or the broker ended the session
    Disconnected(String),
}

/// Outbound side of a live session. Must never block.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), CommsError>;
}

/// Session control, driven only by the connectivity worker
pub trait ProtocolEngine: Send + 'static {
    type Publisher: Publisher + 'static;

    /// Opens the network connection and completes the protocol handshake
    fn connect(
        &mut self,
        settings: &ConnectSettings,
    ) -> impl Future<Output = Result<Self::Publisher, CommsError>> + Send;

    /// Subscribes to all `topics` in a single request and waits for the
    /// broker to acknowledge every one of them
    fn subscribe(
        &mut self,
        topics: Vec<String>,
        qos: QoS,
    ) -> impl Future<Output = Result<(), CommsError>> + Send;

    fn wait_for_message(&mut self, timeout: Duration)
        -> impl Future<Output = WaitOutcome> + Send;

    /// Closes the session if there is one
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
