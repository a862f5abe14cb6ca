//! # huddle-server
//!
//! Axum HTTP + `WebSocket` signaling relay for interview rooms.
//!
//! - HTTP endpoints: health check, relay statistics, Prometheus metrics
//! - `WebSocket` gateway: connection lifecycle, heartbeat, event dispatch
//! - Relay service: rooms, secondary-camera pairings and the proctor
//!   dashboard, owned by a single task
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::ServerError;
pub use relay::{RelayHandle, RelayStats};
pub use server::HuddleServer;
pub use shutdown::ShutdownCoordinator;
