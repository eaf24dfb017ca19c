//! Channel identity and network readiness
//!
//! Both are preconditions for a connection attempt. Neither being available
//! is an error: the worker just tries again on its next cycle.

use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source of the device's channel id
pub trait IdentityStore: Send + Sync {
    /// `None` while the device has not been given an id yet
    fn read_channel_id(&self) -> Option<u32>;
}

/// Channel id kept as a decimal number in a text file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn read_channel_id(&self) -> Option<u32> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No channel id at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match content.trim().parse::<u32>() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(
                    "Ignoring malformed channel id in {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Tells whether the network is up enough to try a connection
pub trait NetworkProbe: Send + Sync {
    fn is_ready(&self) -> impl Future<Output = bool> + Send;
}

/// Ready once the broker's host name resolves
#[derive(Debug, Clone)]
pub struct ResolveProbe {
    host: String,
    port: u16,
}

impl ResolveProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl NetworkProbe for ResolveProbe {
    async fn is_ready(&self) -> bool {
        match tokio::net::lookup_host((self.host.as_str(), self.port)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("Network not ready, {} does not resolve: {}", self.host, e);
                false
            }
        }
    }
}
