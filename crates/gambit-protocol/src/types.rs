//! Identity and enumeration types shared by records and wire messages.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player, as returned by the authenticator.
///
/// Serialized as a plain number (`#[serde(transparent)]`), so
/// `PlayerId(42)` is `42` on the wire rather than `{"0":42}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Opaque identifier of one match session. Primary key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an already-generated identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, unguessable identifier of a single-use join ticket.
///
/// `Debug` is hand-written so a ticket never ends up verbatim in a log
/// line through `{:?}`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wraps an already-generated ticket value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ticket text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "TicketId({prefix}…)")
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One side of a match: who they are plus the name they chose to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PlayerId,
    pub name: String,
}

impl Participant {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Which seat a participant occupies in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Creator,
    Opponent,
}

impl Role {
    /// Seat colors are fixed: creator is white, opponent is black.
    pub fn color(self) -> Color {
        match self {
            Self::Creator => Color::White,
            Self::Opponent => Color::Black,
        }
    }
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// Side to move. The creator always plays white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The other side.
    pub fn flip(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("white"),
            Self::Black => f.write_str("black"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a session. Only ever moves forward:
///
/// ```text
/// Waiting ──(join)──→ Active ──(terminal move)──→ Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Active,
    Completed,
}

impl SessionStatus {
    /// The single valid successor, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Active),
            Self::Active => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns `true` if moving to `target` is a legal edge.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("waiting"),
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Match outcome
// ---------------------------------------------------------------------------

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl EndReason {
    /// Whether the game ends without a winner.
    pub fn is_draw(self) -> bool {
        !matches!(self, Self::Checkmate)
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient_material",
            Self::FiftyMoveRule => "fifty_move_rule",
            Self::ThreefoldRepetition => "threefold_repetition",
        };
        f.write_str(s)
    }
}

/// Final outcome, set once when a session completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// `None` for every kind of draw.
    pub winner: Option<Color>,
    pub reason: EndReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&PlayerId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_player_id_display() {
        assert_eq!(PlayerId(7).to_string(), "P-7");
    }

    #[test]
    fn test_session_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&SessionId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_ticket_id_debug_does_not_leak_full_value() {
        let ticket = TicketId::new("0123456789abcdef");
        let debug = format!("{ticket:?}");
        assert!(debug.contains("0123"));
        assert!(!debug.contains("0123456789abcdef"));
    }

    #[test]
    fn test_color_flip_alternates() {
        assert_eq!(Color::White.flip(), Color::Black);
        assert_eq!(Color::Black.flip(), Color::White);
        assert_eq!(Color::White.flip().flip(), Color::White);
    }

    #[test]
    fn test_color_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Color::Black).unwrap(), "\"black\"");
    }

    #[test]
    fn test_session_status_next_follows_strict_order() {
        assert_eq!(SessionStatus::Waiting.next(), Some(SessionStatus::Active));
        assert_eq!(
            SessionStatus::Active.next(),
            Some(SessionStatus::Completed)
        );
        assert_eq!(SessionStatus::Completed.next(), None);
    }

    #[test]
    fn test_session_status_rejects_skips_and_regressions() {
        assert!(
            !SessionStatus::Waiting.can_transition_to(SessionStatus::Completed)
        );
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Waiting));
        assert!(
            !SessionStatus::Completed.can_transition_to(SessionStatus::Active)
        );
    }

    #[test]
    fn test_end_reason_draw_classification() {
        assert!(!EndReason::Checkmate.is_draw());
        assert!(EndReason::Stalemate.is_draw());
        assert!(EndReason::ThreefoldRepetition.is_draw());
    }

    #[test]
    fn test_end_reason_display_matches_wire_name() {
        for reason in [
            EndReason::Checkmate,
            EndReason::Stalemate,
            EndReason::InsufficientMaterial,
            EndReason::FiftyMoveRule,
            EndReason::ThreefoldRepetition,
        ] {
            let wire = serde_json::to_string(&reason).unwrap();
            assert_eq!(wire, format!("\"{reason}\""));
        }
    }
}
