//! Listener and relay settings.

use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Browser origin allowed by CORS.
    pub frontend_url: String,
    /// Connections refused beyond this count.
    pub max_connections: usize,
    /// Ping cadence in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Disconnect after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,
    /// Per-connection outbound queue capacity (messages).
    pub outbound_queue_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            frontend_url: "http://localhost:5173".to_string(),
            max_connections: 1000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_bytes: 8 * 1024 * 1024,
            outbound_queue_size: 256,
        }
    }
}

/// Relay state policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// A pairing expires this many seconds after its last activity.
    pub pairing_ttl_secs: u64,
    /// How often expired pairings are swept.
    pub sweep_interval_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            pairing_ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}
