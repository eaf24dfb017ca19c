//! On-disk configuration
//!
//! One TOML file, every section optional. Missing keys fall back to the
//! defaults below, so an empty file is a valid configuration.

use crate::comms::{CommsSettings, QoS};
use crate::panel::{PanelPins, SpiSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "altair-link";
const CONFIG_FILE: &str = "config.toml";
/// Overrides the configuration file location
pub const CONFIG_ENV: &str = "ALTAIR_LINK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub panel: PanelConfig,
    pub identity: IdentityConfig,
    pub output: OutputConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    /// 0, 1 or 2
    pub qos: u8,
    /// Inbound wait per worker cycle
    pub cmd_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub handshake_timeout_ms: u64,
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            use_tls: false,
            username: None,
            password: None,
            keep_alive_secs: 60,
            qos: 1,
            cmd_timeout_ms: 3000,
            reconnect_backoff_ms: 2000,
            handshake_timeout_ms: 5000,
            request_capacity: 100,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub spi: SpiSettings,
    pub pins: PanelPins,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 20,
            spi: SpiSettings::default(),
            pins: PanelPins::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct IdentityConfig {
    /// Text file holding the decimal channel id
    pub path: PathBuf,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            path: config_dir().join("channel_id"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub capacity: usize,
    /// Idle tick that flushes a partial console batch
    pub flush_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            flush_interval_ms: 50,
        }
    }
}

impl BrokerConfig {
    pub fn qos(&self) -> Result<QoS, ConfigError> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(ConfigError::Invalid {
                key: "broker.qos",
                reason: format!("{} is not 0, 1 or 2", other),
            }),
        }
    }

    pub fn comms_settings(&self) -> Result<CommsSettings, ConfigError> {
        let credentials = match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            (Some(user), None) => Some((user.clone(), String::new())),
            (None, Some(_)) => {
                warn!("broker.password set without broker.username, ignoring it");
                None
            }
            (None, None) => None,
        };

        Ok(CommsSettings {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.use_tls,
            credentials,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            qos: self.qos()?,
            wait_timeout: Duration::from_millis(self.cmd_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            request_capacity: self.request_capacity.max(1),
        })
    }
}

impl AppConfig {
    /// `$ALTAIR_LINK_CONFIG`, or `config.toml` in the user's config directory
    pub fn default_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => config_dir().join(CONFIG_FILE),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.broker.qos()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes the defaults to `path` unless a file is already there
    pub async fn ensure_default(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        if !exists {
            info!("Creating default config at {}", path.display());
            AppConfig::default().save(path).await?;
        }
        Ok(())
    }
}

fn config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    base.join(CONFIG_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_default_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        AppConfig::ensure_default(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();

        assert_eq!(loaded, AppConfig::default());
        assert_eq!(loaded.output.capacity, 1024);
        assert_eq!(loaded.broker.cmd_timeout_ms, 3000);
        assert_eq!(loaded.panel.spi.clock_hz, 5_000_000);
        assert_eq!(loaded.panel.pins.led_output_enable, 17);
    }

    #[tokio::test]
    async fn ensure_default_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker]\nhost = \"broker.lan\"\n")
            .await
            .unwrap();

        AppConfig::ensure_default(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();

        assert_eq!(loaded.broker.host, "broker.lan");
        assert_eq!(loaded.broker.port, 1883);
        assert_eq!(loaded.panel, PanelConfig::default());
    }

    #[tokio::test]
    async fn invalid_qos_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker]\nqos = 3\n").await.unwrap();

        let err = AppConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "broker.qos", .. }));
    }

    #[tokio::test]
    async fn malformed_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker\n").await.unwrap();

        let err = AppConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn broker_section_maps_to_comms_settings() {
        let broker = BrokerConfig {
            username: Some("altair".to_string()),
            password: Some("8800".to_string()),
            qos: 0,
            cmd_timeout_ms: 250,
            ..BrokerConfig::default()
        };

        let settings = broker.comms_settings().unwrap();
        assert_eq!(
            settings.credentials,
            Some(("altair".to_string(), "8800".to_string()))
        );
        assert_eq!(settings.qos, QoS::AtMostOnce);
        assert_eq!(settings.wait_timeout, Duration::from_millis(250));
        assert_eq!(settings.reconnect_backoff, Duration::from_secs(2));
    }
}
