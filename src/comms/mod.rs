//! # Remote Channel
//!
//! Connects the emulated machine to an MQTT broker: console traffic in both
//! directions, control and paste input, and the virtual disk request/response
//! pair.
//!
//! ```text
//! comms/
//! ├── topics.rs       - per-device topic set and inbound classification
//! ├── buffer.rs       - console output batching
//! ├── engine.rs       - ProtocolEngine / Publisher seam
//! ├── mqtt_engine.rs  - rumqttc implementation of the seam
//! ├── identity.rs     - channel id source and network readiness probe
//! ├── message.rs      - inbound messages, worker events, sector payloads
//! ├── manager.rs      - connectivity worker and CommsHandle
//! └── error.rs        - CommsError
//! ```
//!
//! ## Lifecycle
//!
//! The worker waits until a channel id exists and the network is up, then
//! connects, subscribes to the four inbound topics and stays in the inbound
//! wait loop until the session drops. Any failure brings it back to
//! `Disconnected`, and the next attempt follows after a fixed backoff. There
//! is no give-up limit.
//!
//! Callers never see an error from the outbound operations. While no session
//! is live they do nothing at all.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod identity;
pub mod manager;
pub mod message;
pub mod mqtt_engine;
pub mod topics;

pub use buffer::OutputBuffer;
pub use engine::{ConnectSettings, MessageChunk, ProtocolEngine, Publisher, QoS, WaitOutcome};
pub use error::CommsError;
pub use identity::{FileIdentityStore, IdentityStore, NetworkProbe, ResolveProbe};
pub use manager::{
    CommsHandle, CommsManager, CommsSettings, CommsStatus, ConnectionState, ConsoleOutput,
};
pub use message::{CommsEvent, InboundMessage, SectorWrite, SECTOR_LEN};
pub use mqtt_engine::{MqttEngine, MqttPublisher};
pub use topics::{TopicBinder, TopicKind, TopicSet};
