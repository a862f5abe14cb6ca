//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::error::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused because the connection limit was reached (counter).
pub const WS_CONNECTIONS_REFUSED_TOTAL: &str = "ws_connections_refused_total";
/// Inbound events handled by the relay (counter, labels: event).
pub const RELAY_EVENTS_TOTAL: &str = "relay_events_total";
/// Inbound frames dropped as malformed or unknown (counter, labels: kind).
pub const RELAY_EVENTS_REJECTED_TOTAL: &str = "relay_events_rejected_total";
/// Messages enqueued to a recipient (counter).
pub const RELAY_DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Messages dropped because the recipient queue was full or closed (counter).
pub const RELAY_DROPS_TOTAL: &str = "relay_drops_total";
/// Rooms with at least one member (gauge).
pub const RELAY_ROOMS_ACTIVE: &str = "relay_rooms_active";
/// Live secondary-camera pairings (gauge).
pub const RELAY_PAIRINGS_ACTIVE: &str = "relay_pairings_active";
/// Pairings removed after their TTL lapsed (counter).
pub const RELAY_PAIRINGS_EXPIRED_TOTAL: &str = "relay_pairings_expired_total";
