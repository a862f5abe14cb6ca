//! WebSocket wire protocol.
//!
//! Inbound frames are JSON objects `{"type": "<event>", "data": {...}}`. The
//! relay understands a fixed catalogue of event types; everything else is
//! rejected with a [`ProtocolError`] that the caller logs and drops.
//!
//! Outbound frames use the [`ServerEvent`] envelope
//! `{"type": "<event>", "timestamp": "<RFC 3339>", "data": {...}}`.
//!
//! Opaque client payloads (SDP offers, code buffers, snapshots, proctoring
//! reports) are carried as [`serde_json::Value`] and forwarded verbatim.

use chrono::{SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::{ConnectionId, PairingCode, RoomId};

// ── Event names ─────────────────────────────────────────────────────────────

/// Inbound: join the proctor dashboard group.
pub const JOIN_PROCTOR_DASHBOARD: &str = "join-proctor-dashboard";
/// Inbound: leave the proctor dashboard group.
pub const LEAVE_PROCTOR_DASHBOARD: &str = "leave-proctor-dashboard";
/// Inbound: join an interview room.
pub const JOIN_INTERVIEW: &str = "join-interview";
/// Inbound: leave an interview room.
pub const LEAVE_INTERVIEW: &str = "leave-interview";
/// Inbound + outbound: WebRTC SDP offer.
pub const WEBRTC_OFFER: &str = "webrtc-offer";
/// Inbound + outbound: WebRTC SDP answer.
pub const WEBRTC_ANSWER: &str = "webrtc-answer";
/// Inbound + outbound: WebRTC ICE candidate.
pub const WEBRTC_ICE_CANDIDATE: &str = "webrtc-ice-candidate";
/// Inbound + outbound: collaborative editor update.
pub const CODE_UPDATE: &str = "code-update";
/// Inbound + outbound: interviewer switched the question.
pub const QUESTION_UPDATE: &str = "question-update";
/// Inbound + outbound: chat line, echoed to the sender.
pub const CHAT_MESSAGE: &str = "chat-message";
/// Inbound: proctoring signal raised by the candidate's client.
pub const PROCTORING_EVENT: &str = "proctoring-event";
/// Inbound: primary device registers a pairing code.
pub const REGISTER_SECONDARY_CAMERA: &str = "register-secondary-camera";
/// Inbound: phone attaches to a pairing code.
pub const CONNECT_SECONDARY_CAMERA: &str = "connect-secondary-camera";
/// Inbound + outbound: phone camera frame.
pub const SECONDARY_SNAPSHOT: &str = "secondary-snapshot";

/// Outbound: first frame on every connection, carries the connection id.
pub const CONNECTION_ESTABLISHED: &str = "connection.established";
/// Outbound: someone joined the room.
pub const USER_JOINED: &str = "user-joined";
/// Outbound: someone left the room (explicitly or by disconnecting).
pub const USER_LEFT: &str = "user-left";
/// Outbound: dashboard summary of room activity.
pub const SESSION_UPDATE: &str = "session-update";
/// Outbound: proctoring alert for the room and the dashboard.
pub const PROCTORING_ALERT: &str = "proctoring-alert";
/// Outbound: phone attached, sent to the primary device only.
pub const SECONDARY_CAMERA_CONNECTED: &str = "secondary-camera-connected";

/// Current time formatted the way every outbound timestamp is.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Inbound payloads ────────────────────────────────────────────────────────

/// Accept ids sent as either JSON strings or numbers (interview ids are
/// often numeric database keys on the client side).
fn string_or_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(T::from(s)),
        Value::Number(n) => Ok(T::from(n.to_string())),
        other => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

/// `join-interview` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    /// Room to join.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// Display name shown to the other members.
    #[serde(default)]
    pub user_name: Value,
    /// Participant role (candidate, interviewer, ...).
    #[serde(default)]
    pub role: Value,
}

/// `leave-interview` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoom {
    /// Room to leave.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
}

/// Which WebRTC signaling message a [`Signal`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    /// SDP offer.
    Offer,
    /// SDP answer.
    Answer,
    /// ICE candidate.
    IceCandidate,
}

impl SignalKind {
    /// Wire name of the event, identical inbound and outbound.
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Offer => WEBRTC_OFFER,
            Self::Answer => WEBRTC_ANSWER,
            Self::IceCandidate => WEBRTC_ICE_CANDIDATE,
        }
    }

    /// Name of the data field that carries the signaling blob.
    pub fn payload_field(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "candidate",
        }
    }
}

#[derive(Deserialize)]
struct SignalFrame {
    to: ConnectionId,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// Peer-to-peer signaling message addressed to one connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    /// Offer, answer or candidate.
    pub kind: SignalKind,
    /// Target connection.
    pub to: ConnectionId,
    /// Opaque signaling blob.
    pub payload: Value,
}

/// `code-update` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    /// Room to broadcast into.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// Editor contents.
    #[serde(default)]
    pub code: Value,
    /// Editor language mode.
    #[serde(default)]
    pub language: Value,
}

/// `question-update` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionUpdate {
    /// Room to broadcast into.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// The new question object.
    #[serde(default)]
    pub question: Value,
}

/// `chat-message` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Room to broadcast into.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// Message body.
    #[serde(default)]
    pub message: Value,
    /// Sender display name.
    #[serde(default)]
    pub user_name: Value,
}

/// `proctoring-event` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringReport {
    /// Room the report belongs to.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// Opaque proctoring event (tab switch, face missing, ...).
    #[serde(default)]
    pub event: Value,
}

/// `register-secondary-camera` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPairing {
    /// Room the secondary camera feeds.
    #[serde(deserialize_with = "string_or_number")]
    pub interview_id: RoomId,
    /// Pairing code shown to the user.
    #[serde(deserialize_with = "string_or_number")]
    pub code: PairingCode,
}

/// `connect-secondary-camera` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachSecondary {
    /// Pairing code typed on the phone.
    #[serde(deserialize_with = "string_or_number")]
    pub code: PairingCode,
    /// Phone-side status string, forwarded to the primary.
    #[serde(default)]
    pub status: Value,
}

/// `secondary-snapshot` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryFrame {
    /// Pairing code the phone attached with.
    #[serde(deserialize_with = "string_or_number")]
    pub code: PairingCode,
    /// Encoded camera frame.
    #[serde(default)]
    pub snapshot: Value,
}

// ── ClientEvent ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// A parsed inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Join the proctor dashboard group.
    JoinDashboard,
    /// Leave the proctor dashboard group.
    LeaveDashboard,
    /// Join an interview room.
    JoinRoom(JoinRoom),
    /// Leave an interview room.
    LeaveRoom(LeaveRoom),
    /// WebRTC signaling addressed to one peer.
    Signal(Signal),
    /// Editor update for the rest of the room.
    CodeUpdate(CodeUpdate),
    /// Question change for the rest of the room.
    QuestionUpdate(QuestionUpdate),
    /// Chat line for the whole room, sender included.
    Chat(ChatMessage),
    /// Proctoring signal for the room and the dashboard.
    Proctoring(ProctoringReport),
    /// Primary device registers a pairing code.
    RegisterPairing(RegisterPairing),
    /// Phone attaches to a pairing code.
    AttachSecondary(AttachSecondary),
    /// Phone camera frame.
    SecondaryFrame(SecondaryFrame),
}

fn payload<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    data: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

fn signal(kind: SignalKind, data: Value) -> Result<ClientEvent, ProtocolError> {
    let frame: SignalFrame = payload(kind.event_name(), data)?;
    let mut fields = frame.fields;
    Ok(ClientEvent::Signal(Signal {
        kind,
        to: frame.to,
        payload: fields.remove(kind.payload_field()).unwrap_or(Value::Null),
    }))
}

impl ClientEvent {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame =
            serde_json::from_str(text).map_err(ProtocolError::MalformedFrame)?;
        Self::from_parts(&frame.kind, frame.data)
    }

    /// Build an event from its wire name and `data` payload.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, ProtocolError> {
        match kind {
            JOIN_PROCTOR_DASHBOARD => Ok(Self::JoinDashboard),
            LEAVE_PROCTOR_DASHBOARD => Ok(Self::LeaveDashboard),
            JOIN_INTERVIEW => payload(JOIN_INTERVIEW, data).map(Self::JoinRoom),
            LEAVE_INTERVIEW => payload(LEAVE_INTERVIEW, data).map(Self::LeaveRoom),
            WEBRTC_OFFER => signal(SignalKind::Offer, data),
            WEBRTC_ANSWER => signal(SignalKind::Answer, data),
            WEBRTC_ICE_CANDIDATE => signal(SignalKind::IceCandidate, data),
            CODE_UPDATE => payload(CODE_UPDATE, data).map(Self::CodeUpdate),
            QUESTION_UPDATE => payload(QUESTION_UPDATE, data).map(Self::QuestionUpdate),
            CHAT_MESSAGE => payload(CHAT_MESSAGE, data).map(Self::Chat),
            PROCTORING_EVENT => payload(PROCTORING_EVENT, data).map(Self::Proctoring),
            REGISTER_SECONDARY_CAMERA => {
                payload(REGISTER_SECONDARY_CAMERA, data).map(Self::RegisterPairing)
            }
            CONNECT_SECONDARY_CAMERA => {
                payload(CONNECT_SECONDARY_CAMERA, data).map(Self::AttachSecondary)
            }
            SECONDARY_SNAPSHOT => payload(SECONDARY_SNAPSHOT, data).map(Self::SecondaryFrame),
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinDashboard => JOIN_PROCTOR_DASHBOARD,
            Self::LeaveDashboard => LEAVE_PROCTOR_DASHBOARD,
            Self::JoinRoom(_) => JOIN_INTERVIEW,
            Self::LeaveRoom(_) => LEAVE_INTERVIEW,
            Self::Signal(s) => s.kind.event_name(),
            Self::CodeUpdate(_) => CODE_UPDATE,
            Self::QuestionUpdate(_) => QUESTION_UPDATE,
            Self::Chat(_) => CHAT_MESSAGE,
            Self::Proctoring(_) => PROCTORING_EVENT,
            Self::RegisterPairing(_) => REGISTER_SECONDARY_CAMERA,
            Self::AttachSecondary(_) => CONNECT_SECONDARY_CAMERA,
            Self::SecondaryFrame(_) => SECONDARY_SNAPSHOT,
        }
    }
}

// ── ServerEvent ─────────────────────────────────────────────────────────────

/// Outbound event envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the server emitted the event.
    pub timestamp: String,
    /// Event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerEvent {
    /// Stamp a new event with the current time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: now_rfc3339(),
            data: Some(data),
        }
    }

    /// The greeting every connection receives first.
    pub fn connection_established(id: &ConnectionId) -> Self {
        Self::new(
            CONNECTION_ESTABLISHED,
            serde_json::json!({ "clientId": id }),
        )
    }

    /// Serialize to the text frame sent on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
