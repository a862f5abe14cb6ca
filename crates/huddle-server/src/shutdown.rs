//! Stop signal shared by the listener, the relay service and every session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the token that stops the listener, every session and the relay.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator whose token has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the stop token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every holder of the token to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Signal stop, then wait up to `grace` for the listener and relay
    /// tasks. Returns `false` if some task was still running at the deadline.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, grace: Duration) -> bool {
        self.shutdown();
        info!(tasks = tasks.len(), grace_ms = grace.as_millis(), "draining relay tasks");

        let drained = tokio::time::timeout(grace, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !drained {
            warn!(?grace, "relay tasks still running after grace period");
        }
        drained
    }
}
