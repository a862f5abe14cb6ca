//! Protocol error types.
//!
//! These never reach the client: the relay has no error channel back to the
//! sender. They exist so the session loop can log and count what it dropped.

use thiserror::Error;

/// Reasons an inbound frame was not turned into a [`ClientEvent`].
///
/// [`ClientEvent`]: crate::protocol::ClientEvent
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object with a string `type` field.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// The `type` field names an event the relay does not handle.
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// The `data` payload does not match the shape of a known event.
    #[error("invalid payload for {event}: {source}")]
    InvalidPayload {
        /// Wire name of the event.
        event: &'static str,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Short classification string for logging/metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::UnknownEvent(_) => "unknown_event",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
