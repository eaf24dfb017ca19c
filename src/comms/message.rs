use super::manager::ConnectionState;
use super::topics::TopicKind;
use chrono::{DateTime, Local};
use std::fmt;

/// Length of one virtual disk sector (8" Altair floppy)
pub const SECTOR_LEN: usize = 137;

/// Message received on one of the device's inbound topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: TopicKind,
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(kind: TopicKind, topic: String, payload: Vec<u8>) -> Self {
        Self {
            kind,
            topic,
            payload,
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = String::from_utf8_lossy(&self.payload)
            .chars()
            .take(16)
            .collect();
        write!(
            f,
            "{} [{}] {} - {:?}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.kind,
            self.topic,
            preview
        )
    }
}

/// Notifications from the connectivity worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommsEvent {
    StateChanged(ConnectionState),
    /// Fired once per successful connect + subscribe
    Connected { channel_id: u32 },
    Message(InboundMessage),
}

/// Sector write request for the remote disk service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorWrite {
    pub offset: u32,
    pub sector: [u8; SECTOR_LEN],
}

impl SectorWrite {
    pub fn new(offset: u32, sector: [u8; SECTOR_LEN]) -> Self {
        Self { offset, sector }
    }

    /// Offset (little-endian) followed by the raw sector
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + SECTOR_LEN);
        bytes.extend_from_slice(&self.offset.to_le_bytes());
        bytes.extend_from_slice(&self.sector);
        bytes
    }
}
