//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host bound when none is configured.
pub const DEFAULT_HOST: &str = "localhost";

/// Heartbeat timeout used when none (or zero) is configured.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 30_000;

/// Upper bound on the heartbeat sweep interval.
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Largest HTTP body or WebSocket message accepted by default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for an RPC server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks an ephemeral port).
    pub port: u16,
    /// Accepted API keys. Empty disables the authentication gate.
    pub api_keys: Vec<String>,
    /// Heartbeat timeout in milliseconds.
    pub heartbeat_timeout_ms: Option<u64>,
    /// Free-form values handed through to backends at setup.
    pub env: Map<String, Value>,
    /// Max HTTP body / WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Answer CORS preflight and add CORS headers to HTTP responses.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: 0,
            api_keys: Vec::new(),
            heartbeat_timeout_ms: None,
            env: Map::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            cors: true,
        }
    }
}

impl ServerConfig {
    /// Interval between heartbeat sweeps.
    ///
    /// The configured timeout is capped at one second so a dead peer is
    /// always noticed within a couple of seconds.
    pub fn heartbeat_interval(&self) -> Duration {
        let ms = self
            .heartbeat_timeout_ms
            .filter(|&ms| ms > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_MS);
        Duration::from_millis(ms.min(MAX_HEARTBEAT_INTERVAL_MS))
    }

    /// Whether requests must carry an accepted API key.
    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }
}
