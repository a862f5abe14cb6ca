//! Server configuration.

use std::time::Duration;

use huddle_settings::HuddleSettings;

/// Runtime configuration for [`HuddleServer`](crate::HuddleServer).
///
/// Built from [`HuddleSettings`] by the binary. `Default` binds to loopback
/// on an auto-assigned port, which is what tests want.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Browser origin allowed by CORS.
    pub frontend_url: String,
    /// Upgrades beyond this many live connections get `503`.
    pub max_connections: usize,
    /// Ping cadence.
    pub heartbeat_interval: Duration,
    /// Close the connection after this long without a pong.
    pub heartbeat_timeout: Duration,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_size: usize,
    /// Pairing lifetime since last activity.
    pub pairing_ttl: Duration,
    /// Expired-pairing sweep cadence.
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Self::from(&HuddleSettings::default())
        }
    }
}

impl From<&HuddleSettings> for ServerConfig {
    fn from(settings: &HuddleSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            frontend_url: server.frontend_url.clone(),
            max_connections: server.max_connections,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_size: server.max_message_bytes,
            outbound_queue_size: server.outbound_queue_size,
            pairing_ttl: Duration::from_secs(settings.relay.pairing_ttl_secs),
            sweep_interval: Duration::from_secs(settings.relay.sweep_interval_secs),
        }
    }
}

impl ServerConfig {
    /// `host:port` string passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
