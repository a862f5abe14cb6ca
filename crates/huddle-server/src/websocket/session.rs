//! WebSocket session lifecycle, from upgrade through disconnect.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use huddle_core::protocol::{ClientEvent, ServerEvent};
use huddle_core::ConnectionId;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{
    RELAY_EVENTS_REJECTED_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::relay::{ConnectionPermit, RelayHandle};

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection with the relay
/// 2. Sends `connection.established` carrying the connection id
/// 3. Forwards queued relay output to the socket, with periodic Pings
/// 4. Parses inbound frames and hands events to the relay
/// 5. Disconnects clients that stay silent past the heartbeat timeout
/// 6. Removes the connection from the relay on exit
///
/// `permit` holds the connection slot until the session ends.
#[instrument(skip_all, fields(connection_id = %connection_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    _permit: ConnectionPermit,
    relay: RelayHandle,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.outbound_queue_size);
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    let session = shutdown.child_token();

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    relay.connect(Arc::clone(&connection)).await;

    // Greeting is written directly so it precedes anything the relay queued.
    if !send_greeting(&mut ws_tx, &connection_id).await {
        relay.disconnect(connection_id).await;
        record_disconnect(&connection, "error");
        return;
    }

    let ping_every = config.heartbeat_interval;
    let writer_cancel = session.clone();
    let writer = tokio::spawn(
        async move {
            let mut ping = time::interval_at(Instant::now() + ping_every, ping_every);
            loop {
                tokio::select! {
                    msg = send_rx.recv() => {
                        let Some(text) = msg else { break };
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    () = writer_cancel.cancelled() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
        .in_current_span(),
    );

    let heartbeat_cancel = session.clone();
    let heartbeat = tokio::spawn(
        run_heartbeat(
            Arc::clone(&connection),
            config.heartbeat_interval,
            config.heartbeat_timeout,
            session.clone(),
        )
        .in_current_span(),
    );
    let heartbeat_watch = tokio::spawn(
        async move {
            if let Ok(HeartbeatResult::TimedOut) = heartbeat.await {
                warn!("client unresponsive, disconnecting");
                heartbeat_cancel.cancel();
            }
        }
        .in_current_span(),
    );

    let reason = loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            () = session.cancelled() => {
                break if shutdown.is_cancelled() { "shutdown" } else { "timeout" };
            }
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read error");
                break "error";
            }
            None => break "closed",
        };

        connection.mark_alive();
        match msg {
            Message::Text(text) => dispatch_frame(&relay, &connection_id, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => dispatch_frame(&relay, &connection_id, text).await,
                Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break "closed";
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    };

    session.cancel();
    relay.disconnect(connection_id).await;
    let _ = writer.await;
    let _ = heartbeat_watch.await;
    record_disconnect(&connection, reason);
}

/// Write `connection.established` to the socket. Returns `false` if the
/// client is already gone.
async fn send_greeting<S>(sink: &mut S, connection_id: &ConnectionId) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let json = match ServerEvent::connection_established(connection_id).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize greeting");
            return false;
        }
    };
    match sink.send(Message::Text(json.into())).await {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "failed to send greeting, ending session");
            false
        }
    }
}

fn record_disconnect(connection: &ClientConnection, reason: &'static str) {
    info!(
        reason,
        dropped = connection.drop_count(),
        duration_secs = connection.age().as_secs(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Parse one text frame and hand it to the relay.
///
/// Frames that do not parse are dropped; the sender is never told.
pub async fn dispatch_frame(relay: &RelayHandle, from: &ConnectionId, text: &str) {
    match ClientEvent::parse(text) {
        Ok(event) => relay.dispatch(from.clone(), event).await,
        Err(e) => {
            counter!(RELAY_EVENTS_REJECTED_TOTAL, "kind" => e.kind()).increment(1);
            debug!(error = %e, "dropping inbound frame");
        }
    }
}
