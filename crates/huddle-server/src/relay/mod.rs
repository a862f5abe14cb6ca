//! Signaling relay: rooms, secondary-camera pairings and the proctor
//! dashboard, owned by a single service task.

pub mod pairing;
pub mod rooms;
pub mod service;
pub mod state;

pub use service::{ConnectionPermit, RelayHandle, spawn};
pub use state::{RelayState, RelayStats};
