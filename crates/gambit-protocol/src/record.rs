//! Stored records: the authoritative session state and its join ticket.
//!
//! Both records are written to the shared store as JSON and carry a
//! `schema` tag so a newer server can recognise (and refuse) a layout it
//! does not understand rather than guessing at it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Color, MatchResult, Participant, PlayerId, Role, SessionId,
    SessionStatus, TicketId,
};

/// Current layout version of [`SessionRecord`] and [`JoinTicket`].
pub const RECORD_SCHEMA_VERSION: u16 = 1;

/// Board position every session starts from.
pub const INITIAL_POSITION: &str =
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// One accepted move, in the order it was played.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 1-based half-move number.
    pub ply: u32,
    /// The move exactly as the oracle accepted it.
    pub notation: String,
    /// Side that played it.
    pub color: Color,
    pub played_at: DateTime<Utc>,
}

/// The authoritative state of one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub schema: u16,
    pub session_id: SessionId,
    pub creator: Participant,
    pub opponent: Option<Participant>,
    /// The outstanding join ticket while the session waits for an
    /// opponent. Cleared when the seat is filled.
    pub join_ticket: Option<TicketId>,
    pub status: SessionStatus,
    pub position: String,
    pub active_color: Color,
    pub moves: Vec<MoveRecord>,
    pub result: Option<MatchResult>,
    /// Incremented by exactly one on every accepted mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_move_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Which seat `player` occupies, if any.
    pub fn role_of(&self, player: PlayerId) -> Option<Role> {
        if self.creator.id == player {
            Some(Role::Creator)
        } else if self.opponent.as_ref().is_some_and(|o| o.id == player) {
            Some(Role::Opponent)
        } else {
            None
        }
    }

    /// The color `player` plays, if they are part of this session.
    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        self.role_of(player).map(Role::color)
    }

    /// Returns `true` if `player` is the creator or the bound opponent.
    pub fn is_participant(&self, player: PlayerId) -> bool {
        self.role_of(player).is_some()
    }
}

/// A single-use capability to become a session's opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTicket {
    pub schema: u16,
    pub ticket_id: TicketId,
    pub session_id: SessionId,
    pub issued_at: DateTime<Utc>,
}
