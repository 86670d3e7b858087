//! Messages that travel on the realtime connection.
//!
//! Every frame is an [`Envelope`]. Its [`Payload`] is one of three things:
//!
//! - [`SystemMessage`] — connection plumbing (handshake, heartbeat, errors
//!   that happen before a player is identified).
//! - [`ClientRequest`] — something a player asks the server to do.
//! - [`ServerEvent`] — a reply or a broadcast from the server.
//!
//! All enums are internally tagged with `"type"` so JavaScript clients can
//! switch on `msg.type`.

use serde::{Deserialize, Serialize};

use crate::{
    Color, EndReason, Participant, PlayerId, Role, SessionId, SessionRecord,
    SessionStatus, TicketId,
};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// The delivery guarantee for a message. Every frame on a match
/// connection is reliable and ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    #[default]
    ReliableOrdered,
}

// ---------------------------------------------------------------------------
// SystemMessage
// ---------------------------------------------------------------------------

/// Connection-level plumbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    /// Client → Server: first frame on every connection.
    Handshake {
        version: u32,
        token: Option<String>,
    },

    /// Server → Client: the token was accepted.
    HandshakeAck {
        player_id: PlayerId,
        server_time: u64,
    },

    /// Either direction: "I'm going away."
    Disconnect { reason: String },

    /// Client → Server keep-alive.
    Heartbeat { client_time: u64 },

    /// Server → Client keep-alive reply, echoing `client_time` for RTT.
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },

    /// Server → Client: failure before or outside any session context.
    /// `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// ClientRequest
// ---------------------------------------------------------------------------

/// Operations a connected, authenticated player can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    /// Open a new session with the caller as creator (white).
    CreateSession { display_name: Option<String> },

    /// Become the opponent of `session_id` by presenting its ticket.
    JoinSession {
        session_id: SessionId,
        ticket_id: TicketId,
        display_name: Option<String>,
    },

    /// Bind this connection to the session's broadcast group.
    Attach { session_id: SessionId },

    /// Unbind this connection from the session's broadcast group.
    Leave { session_id: SessionId },

    /// Play a move in coordinate or algebraic notation.
    SubmitMove {
        session_id: SessionId,
        notation: String,
    },

    /// Ask for the current record without attaching.
    FetchSession { session_id: SessionId },

    /// Creator withdraws a session nobody has joined yet.
    CancelSession { session_id: SessionId },
}

impl ClientRequest {
    /// The session this request targets, if it names one.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::CreateSession { .. } => None,
            Self::JoinSession { session_id, .. }
            | Self::Attach { session_id }
            | Self::Leave { session_id }
            | Self::SubmitMove { session_id, .. }
            | Self::FetchSession { session_id }
            | Self::CancelSession { session_id } => Some(session_id),
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable failure category sent to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TicketInvalid,
    SessionNotJoinable,
    SessionGone,
    JoinFailed,
    Unauthorized,
    SessionNotActive,
    NotYourTurn,
    IllegalMove,
    BadMoveFormat,
    Conflict,
    StoreUnavailable,
    CorruptRecord,
    BadRequest,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::TicketInvalid
            | Self::SessionNotJoinable
            | Self::BadMoveFormat
            | Self::BadRequest => 400,
            Self::Unauthorized => 403,
            Self::SessionGone => 404,
            Self::SessionNotActive
            | Self::NotYourTurn
            | Self::Conflict
            | Self::JoinFailed => 409,
            Self::IllegalMove => 422,
            Self::CorruptRecord => 500,
            Self::StoreUnavailable => 503,
        }
    }

    /// Whether re-submitting the same request from scratch may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Conflict | Self::JoinFailed | Self::StoreUnavailable
        )
    }
}

// ---------------------------------------------------------------------------
// ServerEvent
// ---------------------------------------------------------------------------

/// Replies and broadcasts from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Reply to `CreateSession`.
    SessionCreated {
        session_id: SessionId,
        position: String,
        color: Color,
        join_ticket_id: TicketId,
        status: SessionStatus,
    },

    /// Reply to `JoinSession`.
    SessionJoined {
        session_id: SessionId,
        position: String,
        color: Color,
        status: SessionStatus,
    },

    /// Broadcast: the opponent seat was filled.
    OpponentJoined {
        session_id: SessionId,
        opponent: Participant,
        status: SessionStatus,
        version: u64,
    },

    /// Private reply to `Attach`: the full current record.
    Synced { record: SessionRecord },

    /// Broadcast to the rest of the group when someone attaches.
    PeerAttached {
        session_id: SessionId,
        player: PlayerId,
        role: Role,
        color: Color,
    },

    /// Broadcast: a move was accepted.
    MoveApplied {
        session_id: SessionId,
        version: u64,
        notation: String,
        /// Side that moved.
        color: Color,
        next_turn: Color,
        position: String,
        check: bool,
        terminal: bool,
        status: SessionStatus,
        end_reason: Option<EndReason>,
        winner: Option<Color>,
    },

    /// Reply to `FetchSession`.
    Snapshot { record: SessionRecord },

    /// Reply to `Leave`.
    Left { session_id: SessionId },

    /// Broadcast and reply: the creator withdrew a waiting session.
    SessionCancelled { session_id: SessionId },

    /// A request failed. Only ever sent to the connection that made it.
    Failure {
        session_id: Option<SessionId>,
        kind: ErrorKind,
        code: u16,
        retryable: bool,
        message: String,
    },
}

impl ServerEvent {
    /// Builds a [`ServerEvent::Failure`] with code and retry hint derived
    /// from `kind`.
    pub fn failure(
        session_id: Option<SessionId>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Failure {
            session_id,
            kind,
            code: kind.code(),
            retryable: kind.is_retryable(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// The content of an envelope.
///
/// Adjacently tagged:
/// `{ "type": "Request", "data": { "type": "Attach", "session_id": "…" } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    System(SystemMessage),
    Request(ClientRequest),
    Event(ServerEvent),
}

/// The top-level frame. Every message on the wire is an `Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    #[serde(default)]
    pub channel: Channel,

    pub payload: Payload,
}

impl Envelope {
    /// A reliable-ordered envelope around `payload`.
    pub fn reliable(seq: u64, timestamp: u64, payload: Payload) -> Self {
        Self {
            seq,
            timestamp,
            channel: Channel::ReliableOrdered,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_default_is_reliable_ordered() {
        assert_eq!(Channel::default(), Channel::ReliableOrdered);
    }

    #[test]
    fn test_system_message_handshake_json_format() {
        let msg = SystemMessage::Handshake {
            version: 1,
            token: Some("abc".into()),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "Handshake");
        assert_eq!(json["version"], 1);
        assert_eq!(json["token"], "abc");
    }

    #[test]
    fn test_request_payload_json_shape() {
        let payload = Payload::Request(ClientRequest::SubmitMove {
            session_id: SessionId::new("s-1"),
            notation: "e2e4".into(),
        });
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["type"], "Request");
        assert_eq!(json["data"]["type"], "SubmitMove");
        assert_eq!(json["data"]["session_id"], "s-1");
        assert_eq!(json["data"]["notation"], "e2e4");
    }

    #[test]
    fn test_client_request_parses_from_browser_json() {
        let raw = r#"{
            "type": "JoinSession",
            "session_id": "s-1",
            "ticket_id": "deadbeef",
            "display_name": "bob"
        }"#;
        let req: ClientRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.session_id(), Some(&SessionId::new("s-1")));
    }

    #[test]
    fn test_create_session_has_no_session_id() {
        let req = ClientRequest::CreateSession { display_name: None };
        assert!(req.session_id().is_none());
    }

    #[test]
    fn test_failure_derives_code_and_retry_hint() {
        let event = ServerEvent::failure(
            Some(SessionId::new("s-1")),
            ErrorKind::Conflict,
            "stale",
        );
        match event {
            ServerEvent::Failure {
                code, retryable, ..
            } => {
                assert_eq!(code, 409);
                assert!(retryable);
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[test]
    fn test_error_kind_client_errors_are_not_retryable() {
        for kind in [
            ErrorKind::TicketInvalid,
            ErrorKind::NotYourTurn,
            ErrorKind::IllegalMove,
            ErrorKind::SessionNotActive,
            ErrorKind::Unauthorized,
        ] {
            assert!(!kind.is_retryable(), "{kind:?}");
            assert!((400..500).contains(&kind.code()), "{kind:?}");
        }
    }

    #[test]
    fn test_error_kind_infrastructure_is_5xx() {
        assert_eq!(ErrorKind::StoreUnavailable.code(), 503);
        assert_eq!(ErrorKind::CorruptRecord.code(), 500);
        assert_eq!(ErrorKind::SessionGone.code(), 404);
    }

    #[test]
    fn test_envelope_channel_defaults_when_missing() {
        let json = r#"{
            "seq": 1,
            "timestamp": 100,
            "payload": { "type": "System", "data": { "type": "Heartbeat", "client_time": 5 } }
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.channel, Channel::ReliableOrdered);
    }

    #[test]
    fn test_move_applied_event_json_format() {
        let event = ServerEvent::MoveApplied {
            session_id: SessionId::new("s-1"),
            version: 2,
            notation: "e2e4".into(),
            color: Color::White,
            next_turn: Color::Black,
            position: "p".into(),
            check: false,
            terminal: false,
            status: SessionStatus::Active,
            end_reason: None,
            winner: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "MoveApplied");
        assert_eq!(json["next_turn"], "black");
        assert!(json["end_reason"].is_null());
    }

    #[test]
    fn test_decode_unknown_request_type_returns_error() {
        let unknown = r#"{"type": "Resign", "session_id": "s"}"#;
        let result: Result<ClientRequest, _> = serde_json::from_str(unknown);
        assert!(result.is_err());
    }
}
