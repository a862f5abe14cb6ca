//! WebSocket gateway: per-connection state, heartbeat and session loop.

pub mod connection;
pub mod heartbeat;
pub mod session;
