//! Configuration system for peerkv.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PEERKV_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/peerkv/config.toml
//!   3. ~/.config/peerkv/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerkvConfig {
    pub tls: TlsConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM X.509 certificate. The server presents it; clients pin it and
    /// verify peer-relayed values against its public key.
    pub cert_path: PathBuf,
    /// PEM private key. Server only.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Empty = all interfaces.
    pub bind: String,
    pub port: u16,
    /// Values set (and signed) at startup.
    pub seed: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    /// Seconds a cached value stays servable to peers.
    pub cache_timeout_secs: u64,
    /// Bind address of the inbound peer listener. Empty = all interfaces.
    pub listen_host: String,
    /// Inbound peer listener port. 0 = OS-assigned.
    pub listen_port: u16,
    /// Keys fetched on every iteration of the periodic loop.
    pub fetch_keys: Vec<String>,
    pub fetch_interval_secs: u64,
    /// Pull the roster from the server every N iterations. 0 = never.
    pub peer_refresh_every: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout_ms: u64,
    /// Bound on writing a request and reading its response.
    pub io_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for PeerkvConfig {
    fn default() -> Self {
        Self {
            tls: TlsConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: config_dir().join("server.crt"),
            key_path: config_dir().join("server.key"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: String::new(),
            port: 1337,
            seed: BTreeMap::new(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 1337,
            cache_timeout_secs: 300,
            listen_host: String::new(),
            listen_port: 0,
            fetch_keys: Vec::new(),
            fetch_interval_secs: 5,
            peer_refresh_every: 7,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            io_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs.max(1))
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("peerkv")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PeerkvConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parse a config file, or return defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(PeerkvConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PEERKV_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PeerkvConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PEERKV_* overrides. `lookup` is the environment in production.
    /// Unparseable numbers are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PEERKV_TLS__CERT_PATH") {
            self.tls.cert_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PEERKV_TLS__KEY_PATH") {
            self.tls.key_path = PathBuf::from(v);
        }
        if let Some(p) = lookup("PEERKV_SERVER__PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(v) = lookup("PEERKV_CLIENT__SERVER_HOST") {
            self.client.server_host = v;
        }
        if let Some(p) = lookup("PEERKV_CLIENT__SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.client.server_port = p;
        }
        if let Some(t) = lookup("PEERKV_CLIENT__CACHE_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.client.cache_timeout_secs = t;
        }
    }
}
