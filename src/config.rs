//! Client configuration, loaded from TOML.

use crate::error::{Result, UploadError};
use crate::streaming::planner::ChunkPlanner;
use crate::transport::connection::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CHUNK_THRESHOLD_MB: u64 = 10;
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// Media types the server accepts.
pub const DEFAULT_ACCEPTED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/avi",
    "video/mov",
    "video/webm",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket endpoint path
    pub path: String,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Files strictly larger than this are sent in chunks of this size
    pub chunk_threshold_mb: u64,
    pub accepted_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: "/".to_string(),
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold_mb: DEFAULT_CHUNK_THRESHOLD_MB,
            accepted_types: DEFAULT_ACCEPTED_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/snapwire/config.toml` (platform equivalent elsewhere)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("snapwire").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists, or fall
    /// back to built-in defaults. An explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| UploadError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| UploadError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| UploadError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.chunk_threshold_mb == 0 {
            return Err(UploadError::Config(
                "upload.chunk_threshold_mb must be greater than zero".to_string(),
            ));
        }
        if self.upload.accepted_types.is_empty() {
            return Err(UploadError::Config(
                "upload.accepted_types must not be empty".to_string(),
            ));
        }
        if self.server.host.is_empty() {
            return Err(UploadError::Config("server.host must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn server_url(&self) -> String {
        let path = if self.server.path.starts_with('/') {
            self.server.path.clone()
        } else {
            format!("/{}", self.server.path)
        };
        format!("ws://{}:{}{}", self.server.host, self.server.port, path)
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.server_url(),
            reconnect_delay: Duration::from_secs(self.server.reconnect_delay_secs),
        }
    }

    pub fn planner(&self) -> Result<ChunkPlanner> {
        ChunkPlanner::from_megabytes(self.upload.chunk_threshold_mb)
    }
}
