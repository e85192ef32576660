//! Server configuration, loaded from TOML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("initial_room_state must be a table, got {0}")]
    InitialState(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket listener.
    pub bind_addr: SocketAddr,
    /// Admin HTTP listener; `None` disables the admin surface.
    pub admin_addr: Option<SocketAddr>,
    /// Per-room fan-out buffer.
    pub broadcast_capacity: usize,
    /// Frames above this size are a protocol error.
    pub max_message_bytes: usize,
    /// Snapshot persistence directory; `None` keeps rooms in memory only.
    pub storage_path: Option<PathBuf>,
    /// Rooms created at startup.
    pub initial_room_names: Vec<String>,
    /// Seed for every newly created room: tables become root maps and
    /// arrays become root arrays.
    pub initial_room_state: Option<Value>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            admin_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9091))),
            broadcast_capacity: 256,
            max_message_bytes: 1024 * 1024,
            storage_path: None,
            initial_room_names: Vec::new(),
            initial_room_state: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match &self.initial_room_state {
            None | Some(Value::Object(_)) => Ok(()),
            Some(other) => Err(ConfigError::InitialState(other.to_string())),
        }
    }
}
