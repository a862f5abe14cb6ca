//! Server startup errors.
//!
//! Nothing here reaches a WebSocket client: relay failures degrade to
//! "no recipients" and are only logged.

use axum::http::header::InvalidHeaderValue;
use metrics_exporter_prometheus::BuildError;

/// Errors raised while building or starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured frontend URL is not a valid `Origin` header value.
    #[error("invalid frontend origin {origin:?}")]
    InvalidOrigin {
        /// The rejected value.
        origin: String,
        /// Header parse error.
        #[source]
        source: InvalidHeaderValue,
    },

    /// The listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The global metrics recorder could not be installed.
    #[error("failed to install metrics recorder")]
    Metrics(#[from] BuildError),
}
