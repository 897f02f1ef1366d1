//! Server configuration.
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working configuration. The `LISTEN` environment variable
//! overrides the listen address.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub websocket: WebSocketConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Value of the `Server` response header.
    pub server_name: String,
    /// Period of the idle sweep, in milliseconds.
    pub sweep_interval_ms: u64,
}

/// Limits of a single HTTP connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Longest accepted request or header line.
    pub max_header_length: usize,
    /// Longest accepted header block.
    pub max_headers_length: usize,
    pub max_post_body_length: u64,
    /// Seconds without traffic before the connection is stopped.
    pub max_silent_time: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub max_silent_time: u32,
    /// Seconds of silence before the server pings the peer.
    pub ping_interval: u32,
    pub max_frame_size: u64,
    pub max_fragmented_size: usize,
    /// Accept client frames without a mask key.
    pub allow_unmasked: bool,
}

/// Where and how much multipart file data may be stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory for uploaded files. The system temp directory when unset.
    pub temp_root: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_total_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            server_name: concat!("miniwebd/", env!("CARGO_PKG_VERSION")).to_string(),
            sweep_interval_ms: 1000,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_header_length: 1024,
            max_headers_length: 4096,
            max_post_body_length: 16 * 1024 * 1024,
            max_silent_time: 30,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_silent_time: 3600,
            ping_interval: 30,
            max_frame_size: 16 * 1024 * 1024,
            max_fragmented_size: 16 * 1024 * 1024,
            allow_unmasked: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            max_file_size: u64::MAX,
            max_total_size: u64::MAX,
        }
    }
}

impl ServerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl ConnectionConfig {
    pub fn silent_limit(&self) -> Duration {
        Duration::from_secs(self.max_silent_time.into())
    }
}

impl WebSocketConfig {
    pub fn silent_limit(&self) -> Duration {
        Duration::from_secs(self.max_silent_time.into())
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_interval.max(1).into())
    }
}

impl UploadConfig {
    pub fn root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Config {
    /// Defaults plus the `LISTEN` environment variable.
    pub fn load() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("invalid configuration")
    }

    /// Reads a YAML file, then applies the `LISTEN` environment variable.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut cfg = Self::from_yaml_str(&text)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(listen_addr) = std::env::var("LISTEN") {
            self.server.listen_addr = listen_addr;
        }
    }
}
