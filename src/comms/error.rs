use thiserror::Error;

/// Errors from the remote channel.
///
/// None of these are fatal; the worker reacts to all of them by tearing the
/// session down and trying again after the backoff.
#[derive(Debug, Error)]
pub enum CommsError {
    #[error("Connect to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    #[error("Subscribe refused for {0}")]
    SubscribeRefused(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}
