//! Configuration system for Parley
//!
//! Supports TOML configuration files with sensible defaults.
//! Configuration is loaded from:
//! - macOS: ~/Library/Application Support/parley/config.toml
//! - Linux: ~/.config/parley/config.toml
//! - Windows: %APPDATA%/parley/config.toml

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{DEFAULT_CREDENTIAL_REFRESH_SECS, DEFAULT_PORT};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and relay settings
    pub server: ServerConfig,
    /// STUN/TURN credential settings
    pub ice: IceConfig,
}

/// Listener and relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP/WebSocket port
    pub port: u16,
    /// Bind address
    pub bind: IpAddr,
    /// Directory holding `index.html`, `legal.html` and static assets
    pub www_dir: PathBuf,
    /// Drop a channel record once its last member leaves
    pub prune_empty_channels: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            www_dir: PathBuf::from("www"),
            prune_empty_channels: false,
        }
    }
}

/// STUN/TURN credential configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    /// Hosts allowed to fetch `/ice` (compared against the request `Host`)
    pub allowed_origins: Vec<String>,
    /// Seconds between credential refreshes
    pub refresh_interval_secs: u64,
    /// Twilio account SID (Twilio is used only when both SID and token are set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_account_sid: Option<String>,
    /// Twilio auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_auth_token: Option<String>,
    /// Twilio REST API base URL
    pub twilio_api_base: String,
    /// STUN URLs served when Twilio is not configured
    pub stun_urls: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            refresh_interval_secs: DEFAULT_CREDENTIAL_REFRESH_SECS,
            twilio_account_sid: None,
            twilio_auth_token: None,
            twilio_api_base: "https://api.twilio.com".into(),
            stun_urls: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
        }
    }
}

impl IceConfig {
    /// Twilio credentials, if both halves are configured
    pub fn twilio_credentials(&self) -> Option<(&str, &str)> {
        match (&self.twilio_account_sid, &self.twilio_auth_token) {
            (Some(sid), Some(token)) if !sid.is_empty() && !token.is_empty() => {
                Some((sid.as_str(), token.as_str()))
            }
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("Failed to load config from {:?}: {}, using defaults", path, e);
                Self::default()
            }),
            None => {
                debug!("No config directory found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "parley", "parley")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Generate a sample configuration file content
    pub fn sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
