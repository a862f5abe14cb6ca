//! Relay service task and its cloneable handle.
//!
//! One task owns [`RelayState`]. Sessions send it commands over a bounded
//! channel, so commands from one connection are applied in the order they
//! were sent and no lock is ever held across a send.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use huddle_core::ConnectionId;
use huddle_core::protocol::ClientEvent;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::state::{RelayState, RelayStats};
use crate::websocket::connection::ClientConnection;

/// Command channel capacity.
const COMMAND_QUEUE_SIZE: usize = 1024;

enum Command {
    Connect(Arc<ClientConnection>),
    Event {
        from: ConnectionId,
        event: ClientEvent,
    },
    Disconnect(ConnectionId),
    Stats(oneshot::Sender<RelayStats>),
}

/// A reserved connection slot, released when dropped.
///
/// Obtained from [`RelayHandle::try_reserve`] before a WebSocket upgrade and
/// held for the life of the session, so a failed upgrade frees its slot too.
#[derive(Debug)]
pub struct ConnectionPermit {
    connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let _ = self.connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable handle to the relay service.
#[derive(Clone, Debug)]
pub struct RelayHandle {
    tx: mpsc::Sender<Command>,
    connections: Arc<AtomicUsize>,
}

impl RelayHandle {
    /// Reserve one of `limit` connection slots, or `None` if all are taken.
    pub fn try_reserve(&self, limit: usize) -> Option<ConnectionPermit> {
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionPermit {
                connections: Arc::clone(&self.connections),
            })
    }

    /// Make a connection addressable.
    pub async fn connect(&self, connection: Arc<ClientConnection>) {
        self.submit(Command::Connect(connection)).await;
    }

    /// Apply an inbound event from `from`.
    pub async fn dispatch(&self, from: ConnectionId, event: ClientEvent) {
        self.submit(Command::Event { from, event }).await;
    }

    /// Remove a connection and everything it owns.
    pub async fn disconnect(&self, id: ConnectionId) {
        self.submit(Command::Disconnect(id)).await;
    }

    /// Current counts, or `None` once the service has stopped.
    pub async fn stats(&self) -> Option<RelayStats> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stats(reply)).await;
        rx.await.ok()
    }

    /// Reserved connection slots, without a round trip to the service.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    async fn submit(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            debug!("relay service stopped, command dropped");
        }
    }
}

/// Spawn the relay service.
///
/// The task runs until `cancel` fires or every [`RelayHandle`] is dropped.
/// Expired pairings are swept every `sweep_interval`.
pub fn spawn(
    pairing_ttl: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) -> (RelayHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let handle = RelayHandle {
        tx,
        connections: Arc::new(AtomicUsize::new(0)),
    };
    let state = RelayState::new(pairing_ttl);
    let task = tokio::spawn(run(state, rx, sweep_interval, cancel));
    (handle, task)
}

#[instrument(skip_all, name = "relay")]
async fn run(
    mut state: RelayState,
    mut rx: mpsc::Receiver<Command>,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    let mut sweep = time::interval_at(Instant::now() + sweep_interval, sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("relay service started");

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else { break };
                apply(&mut state, command);
            }
            _ = sweep.tick() => {
                let now = Instant::now();
                let _ = state.sweep(now);
                state.record_gauges(now);
            }
            () = cancel.cancelled() => break,
        }
    }

    info!(stats = ?state.stats(Instant::now()), "relay service stopped");
}

fn apply(state: &mut RelayState, command: Command) {
    let now = Instant::now();
    match command {
        Command::Connect(connection) => state.register(connection),
        Command::Event { from, event } => {
            let _ = state.handle_event(&from, event, now);
            state.record_gauges(now);
        }
        Command::Disconnect(id) => {
            let _ = state.disconnect(&id);
            state.record_gauges(now);
        }
        Command::Stats(reply) => {
            let _ = reply.send(state.stats(now));
        }
    }
}
