//! Relay server configuration

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default address the relay listens on
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Default path of the WebSocket endpoint
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Configuration for a relay server
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Path the WebSocket upgrade is served on
    pub ws_path: String,

    /// Frames queued per connection before sends start waiting
    pub outbound_buffer: usize,

    /// How long a broadcast waits on a full recipient queue before evicting it
    pub send_timeout: Duration,

    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,

    /// Directory with the browser client (`index.html` plus assets)
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            ws_path: DEFAULT_WS_PATH.to_string(),
            outbound_buffer: 64,
            send_timeout: Duration::from_secs(5),
            max_message_size: 1024 * 1024,
            static_dir: None,
        }
    }
}

impl RelayConfig {
    /// Create a configuration bound to the given address, other settings default
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }

    /// Set the WebSocket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the per-connection outbound queue size
    pub fn outbound_buffer(mut self, frames: usize) -> Self {
        self.outbound_buffer = frames;
        self
    }

    /// Set the per-recipient send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the maximum inbound message size
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Serve the browser client from this directory
    pub fn static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// Check the configuration for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.ws_path.clone()));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroOutboundBuffer);
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ZeroSendTimeout);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        if let Some(dir) = &self.static_dir {
            if !dir.is_dir() {
                return Err(ConfigError::MissingStaticDir(dir.display().to_string()));
            }
        }
        Ok(())
    }
}
