//! Client configuration.
//!
//! [`ClamdConfig`] holds every tunable with a named default, and can be
//! loaded from JSON (missing fields take their defaults):
//!
//! ```
//! use clamd_client::ClamdConfig;
//!
//! let config = ClamdConfig::from_json(r#"{ "address": "tcp://127.0.0.1:3310" }"#).unwrap();
//! assert_eq!(config.address, "tcp://127.0.0.1:3310");
//! assert_eq!(config.chunk_size, clamd_client::codec::DEFAULT_CHUNK_SIZE);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{CommandMode, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::error::{ClamdError, Result};
use crate::protocol::DEFAULT_CHANNEL_CAPACITY;

/// Default daemon address (Debian/Ubuntu local socket).
pub const DEFAULT_ADDRESS: &str = "/var/run/clamav/clamd.ctl";

/// Configuration for a [`Clamd`](crate::Clamd) client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClamdConfig {
    /// `tcp://host:port`, `unix:///path` or a bare socket path.
    pub address: String,
    /// Payload bytes per INSTREAM chunk.
    pub chunk_size: usize,
    /// Records buffered between the decoder and the caller.
    pub channel_capacity: usize,
    /// Connect timeout in milliseconds; `None` waits for the OS.
    pub connect_timeout_ms: Option<u64>,
    /// Command prefix and record delimiter convention.
    pub command_mode: CommandMode,
}

impl Default for ClamdConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout_ms: None,
            command_mode: CommandMode::default(),
        }
    }
}

impl ClamdConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClamdConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Check value ranges. The address is checked when the client is built.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ClamdError::InvalidConfig(format!(
                "chunk_size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        if self.channel_capacity == 0 {
            return Err(ClamdError::InvalidConfig(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
