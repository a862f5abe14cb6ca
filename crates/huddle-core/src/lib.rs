//! # huddle-core
//!
//! Shared vocabulary for the Huddle interview relay.
//!
//! - **Branded IDs**: `ConnectionId`, `RoomId`, `PairingCode` as newtypes so a
//!   room id is never passed where a connection id is expected
//! - **Protocol**: inbound `ClientEvent` parsing and outbound `ServerEvent`
//!   envelopes for the WebSocket wire format
//! - **Errors**: `ProtocolError` for frames the relay refuses to act on
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, PairingCode, RoomId};
pub use protocol::{ClientEvent, ServerEvent};
