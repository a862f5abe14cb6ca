//! Relay state and delivery primitives.
//!
//! [`RelayState`] is plain data with synchronous methods. The relay service
//! task owns the only instance, so nothing here locks. Every method that
//! emits returns the number of recipients it enqueued for.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use huddle_core::protocol::{
    self, AttachSecondary, ChatMessage, ClientEvent, CodeUpdate, JoinRoom, LeaveRoom,
    ProctoringReport, QuestionUpdate, RegisterPairing, SecondaryFrame, ServerEvent, Signal,
};
use huddle_core::{ConnectionId, RoomId};
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::pairing::PairingTable;
use super::rooms::RoomTable;
use crate::metrics::{
    RELAY_DELIVERIES_TOTAL, RELAY_DROPS_TOTAL, RELAY_EVENTS_TOTAL, RELAY_PAIRINGS_ACTIVE,
    RELAY_ROOMS_ACTIVE,
};
use crate::websocket::connection::ClientConnection;

/// Point-in-time counts of relay state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Registered connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Live secondary-camera pairings.
    pub pairings: usize,
    /// Connections in the proctor dashboard group.
    pub dashboard: usize,
}

/// Connections, rooms, pairings and the dashboard group.
pub struct RelayState {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    rooms: RoomTable,
    pairings: PairingTable,
    dashboard: HashSet<ConnectionId>,
}

impl RelayState {
    /// Create empty state whose pairings expire after `pairing_ttl` idle.
    pub fn new(pairing_ttl: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            rooms: RoomTable::new(),
            pairings: PairingTable::new(pairing_ttl),
            dashboard: HashSet::new(),
        }
    }

    /// Make a connection addressable.
    pub fn register(&mut self, connection: Arc<ClientConnection>) {
        debug!(conn_id = %connection.id, "connection registered with relay");
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Whether `id` is registered.
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Whether `id` is in the dashboard group.
    pub fn in_dashboard(&self, id: &ConnectionId) -> bool {
        self.dashboard.contains(id)
    }

    /// Room membership, read-only.
    pub fn rooms(&self) -> &RoomTable {
        &self.rooms
    }

    /// Pairings, read-only.
    pub fn pairings(&self) -> &PairingTable {
        &self.pairings
    }

    /// Counts as of `now`. Expired pairings are not counted, swept or not.
    pub fn stats(&self, now: Instant) -> RelayStats {
        RelayStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            pairings: self.pairings.live_count(now),
            dashboard: self.dashboard.len(),
        }
    }

    // ── Delivery primitives ─────────────────────────────────────────

    /// Deliver to `target` only. An unknown target is not an error.
    pub fn relay_to_peer(&self, target: &ConnectionId, event: &ServerEvent) -> usize {
        self.deliver(std::iter::once(target), event)
    }

    /// Deliver to every member of `room` except `sender`.
    pub fn broadcast_in_room(
        &self,
        room: &RoomId,
        sender: &ConnectionId,
        event: &ServerEvent,
    ) -> usize {
        self.deliver(self.rooms.members(room).filter(|id| *id != sender), event)
    }

    /// Deliver to every member of `room`, the sender included.
    pub fn broadcast_to_room_inclusive(&self, room: &RoomId, event: &ServerEvent) -> usize {
        self.deliver(self.rooms.members(room), event)
    }

    /// Deliver to every dashboard connection.
    pub fn broadcast_to_dashboard(&self, event: &ServerEvent) -> usize {
        self.deliver(self.dashboard.iter(), event)
    }

    fn deliver<'a>(
        &self,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        let json = match event.to_json() {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for id in recipients {
            let Some(conn) = self.connections.get(id) else {
                debug!(event_type = %event.event_type, conn_id = %id, "recipient not connected");
                continue;
            };
            if conn.send(Arc::clone(&json)) {
                delivered += 1;
            } else {
                counter!(RELAY_DROPS_TOTAL).increment(1);
                warn!(
                    event_type = %event.event_type,
                    conn_id = %id,
                    dropped = conn.drop_count(),
                    "failed to enqueue event (queue full or closed)"
                );
            }
        }
        counter!(RELAY_DELIVERIES_TOTAL).increment(delivered as u64);
        delivered
    }

    // ── Event handling ──────────────────────────────────────────────

    /// Apply one inbound event from `sender`.
    pub fn handle_event(&mut self, sender: &ConnectionId, event: ClientEvent, now: Instant) -> usize {
        let name = event.name();
        counter!(RELAY_EVENTS_TOTAL, "event" => name).increment(1);

        let recipients = match event {
            ClientEvent::JoinDashboard => {
                let _ = self.dashboard.insert(sender.clone());
                0
            }
            ClientEvent::LeaveDashboard => {
                let _ = self.dashboard.remove(sender);
                0
            }
            ClientEvent::JoinRoom(join) => self.join_room(sender, join),
            ClientEvent::LeaveRoom(leave) => self.leave_room(sender, &leave),
            ClientEvent::Signal(signal) => self.signal(sender, signal),
            ClientEvent::CodeUpdate(update) => self.code_update(sender, update),
            ClientEvent::QuestionUpdate(update) => self.question_update(sender, update),
            ClientEvent::Chat(chat) => self.chat(sender, chat),
            ClientEvent::Proctoring(report) => self.proctoring(sender, report),
            ClientEvent::RegisterPairing(register) => self.register_pairing(sender, register, now),
            ClientEvent::AttachSecondary(attach) => self.attach_secondary(sender, attach, now),
            ClientEvent::SecondaryFrame(frame) => self.secondary_frame(sender, frame, now),
        };

        debug!(event = name, conn_id = %sender, recipients, "relayed event");
        recipients
    }

    fn join_room(&mut self, sender: &ConnectionId, join: JoinRoom) -> usize {
        let room = join.interview_id;
        if !self.rooms.join(&room, sender) {
            debug!(conn_id = %sender, room = %room, "already a member");
        }

        let joined = ServerEvent::new(
            protocol::USER_JOINED,
            json!({
                "userId": sender,
                "userName": join.user_name,
                "role": join.role,
            }),
        );
        let update = ServerEvent::new(
            protocol::SESSION_UPDATE,
            json!({
                "interviewId": room,
                "type": protocol::USER_JOINED,
                "userName": join.user_name,
                "role": join.role,
            }),
        );
        self.broadcast_in_room(&room, sender, &joined) + self.broadcast_to_dashboard(&update)
    }

    fn leave_room(&mut self, sender: &ConnectionId, leave: &LeaveRoom) -> usize {
        if !self.rooms.leave(&leave.interview_id, sender) {
            return 0;
        }
        let left = ServerEvent::new(protocol::USER_LEFT, json!({ "userId": sender }));
        self.broadcast_in_room(&leave.interview_id, sender, &left)
    }

    fn signal(&self, sender: &ConnectionId, signal: Signal) -> usize {
        let mut data = Map::new();
        let _ = data.insert(signal.kind.payload_field().to_owned(), signal.payload);
        let _ = data.insert("from".to_owned(), json!(sender));
        let event = ServerEvent::new(signal.kind.event_name(), Value::Object(data));
        self.relay_to_peer(&signal.to, &event)
    }

    fn code_update(&self, sender: &ConnectionId, update: CodeUpdate) -> usize {
        let event = ServerEvent::new(
            protocol::CODE_UPDATE,
            json!({
                "code": update.code,
                "language": update.language,
                "from": sender,
            }),
        );
        self.broadcast_in_room(&update.interview_id, sender, &event)
    }

    fn question_update(&self, sender: &ConnectionId, update: QuestionUpdate) -> usize {
        let event = ServerEvent::new(
            protocol::QUESTION_UPDATE,
            json!({ "question": update.question, "from": sender }),
        );
        self.broadcast_in_room(&update.interview_id, sender, &event)
    }

    fn chat(&self, sender: &ConnectionId, chat: ChatMessage) -> usize {
        let event = ServerEvent::new(
            protocol::CHAT_MESSAGE,
            json!({
                "message": chat.message,
                "userName": chat.user_name,
                "timestamp": protocol::now_rfc3339(),
                "from": sender,
            }),
        );
        self.broadcast_to_room_inclusive(&chat.interview_id, &event)
    }

    fn proctoring(&self, sender: &ConnectionId, report: ProctoringReport) -> usize {
        let timestamp = protocol::now_rfc3339();
        let to_room = ServerEvent::new(
            protocol::PROCTORING_ALERT,
            json!({ "event": report.event, "timestamp": timestamp }),
        );
        let to_dashboard = ServerEvent::new(
            protocol::PROCTORING_ALERT,
            json!({
                "interviewId": report.interview_id,
                "event": report.event,
                "timestamp": timestamp,
            }),
        );
        self.broadcast_in_room(&report.interview_id, sender, &to_room)
            + self.broadcast_to_dashboard(&to_dashboard)
    }

    fn register_pairing(
        &mut self,
        sender: &ConnectionId,
        register: RegisterPairing,
        now: Instant,
    ) -> usize {
        let code = register.code;
        if let Some(previous) =
            self.pairings
                .register(code.clone(), register.interview_id, sender.clone(), now)
        {
            debug!(code = %code, previous_primary = %previous.primary, "pairing code re-registered");
        }
        0
    }

    fn attach_secondary(
        &mut self,
        sender: &ConnectionId,
        attach: AttachSecondary,
        now: Instant,
    ) -> usize {
        let Some(primary) = self
            .pairings
            .attach(&attach.code, sender.clone(), now)
            .map(|p| p.primary.clone())
        else {
            debug!(code = %attach.code, conn_id = %sender, "attach to unknown pairing code");
            return 0;
        };
        let event = ServerEvent::new(
            protocol::SECONDARY_CAMERA_CONNECTED,
            json!({ "status": attach.status, "timestamp": protocol::now_rfc3339() }),
        );
        self.relay_to_peer(&primary, &event)
    }

    fn secondary_frame(&mut self, sender: &ConnectionId, frame: SecondaryFrame, now: Instant) -> usize {
        let Some((primary, room)) = self
            .pairings
            .touch(&frame.code, now)
            .map(|p| (p.primary.clone(), p.room_id.clone()))
        else {
            debug!(code = %frame.code, "frame for unknown pairing code");
            return 0;
        };

        let mut recipients: BTreeSet<&ConnectionId> = self.rooms.members(&room).collect();
        let _ = recipients.insert(&primary);
        let _ = recipients.remove(sender);

        let event = ServerEvent::new(
            protocol::SECONDARY_SNAPSHOT,
            json!({ "snapshot": frame.snapshot, "timestamp": protocol::now_rfc3339() }),
        );
        self.deliver(recipients, &event)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Remove `id` from every room, pairing and the dashboard group.
    ///
    /// Remaining room members are told with `user-left`. Returns how many
    /// notifications were enqueued.
    pub fn disconnect(&mut self, id: &ConnectionId) -> usize {
        let _ = self.connections.remove(id);
        let rooms = self.rooms.remove_connection(id);
        let cleanup = self.pairings.remove_connection(id);
        let _ = self.dashboard.remove(id);

        let left = ServerEvent::new(protocol::USER_LEFT, json!({ "userId": id }));
        let notified: usize = rooms
            .iter()
            .map(|room| self.broadcast_to_room_inclusive(room, &left))
            .sum();

        debug!(
            conn_id = %id,
            rooms = rooms.len(),
            pairings_removed = cleanup.removed,
            pairings_detached = cleanup.detached,
            notified,
            "connection removed from relay"
        );
        notified
    }

    /// Drop expired pairings.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let expired = self.pairings.sweep(now);
        if expired > 0 {
            debug!(expired, "swept expired pairings");
        }
        expired
    }

    /// Publish room and live-pairing gauges as of `now`.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_gauges(&self, now: Instant) {
        gauge!(RELAY_ROOMS_ACTIVE).set(self.rooms.len() as f64);
        gauge!(RELAY_PAIRINGS_ACTIVE).set(self.pairings.live_count(now) as f64);
    }
}
