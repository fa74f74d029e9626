//! Parley Core - Shared identifiers, wire protocol and configuration
//!
//! This crate contains the types shared by the signaling relay and its
//! clients. It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

pub use config::{Config, ConfigError, IceConfig, ServerConfig};
pub use error::*;
pub use protocol::*;
pub use types::*;

/// Default HTTP/WebSocket port
pub const DEFAULT_PORT: u16 = 3000;

/// Default ICE credential refresh interval (10 minutes)
pub const DEFAULT_CREDENTIAL_REFRESH_SECS: u64 = 10 * 60;
