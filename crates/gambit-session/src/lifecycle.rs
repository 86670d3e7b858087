//! Pure session state transitions.
//!
//! Nothing in this module touches the store or the clock: every function
//! takes the current record (and `now`) and returns the next one. The
//! service and the pipeline decide whether that next record actually
//! becomes authoritative, through a compare-and-set.
//!
//! ```text
//!   new_session ──→ [Waiting v0] ──bind_opponent──→ [Active v1]
//!                                                      │
//!                                   apply_verdict (ongoing) ↺
//!                                                      │
//!                                   apply_verdict (terminal)
//!                                                      ▼
//!                                                 [Completed]
//! ```

use chrono::{DateTime, Utc};
use gambit_protocol::{
    Color, INITIAL_POSITION, JoinTicket, MatchResult, MoveRecord,
    Participant, PlayerId, RECORD_SCHEMA_VERSION, SessionId, SessionRecord,
    SessionStatus, TicketId,
};
use rand::Rng;

use crate::{MatchError, Verdict};

/// Builds a fresh `Waiting` session owned by `creator`, plus the single
/// join ticket that lets an opponent in.
pub fn new_session(
    creator: Participant,
    now: DateTime<Utc>,
) -> (SessionRecord, JoinTicket) {
    let session_id = SessionId::new(uuid::Uuid::new_v4().to_string());
    let ticket_id = TicketId::new(generate_token());

    let record = SessionRecord {
        schema: RECORD_SCHEMA_VERSION,
        session_id: session_id.clone(),
        creator,
        opponent: None,
        join_ticket: Some(ticket_id.clone()),
        status: SessionStatus::Waiting,
        position: INITIAL_POSITION.to_owned(),
        active_color: Color::White,
        moves: Vec::new(),
        result: None,
        version: 0,
        created_at: now,
        last_move_at: None,
    };
    let ticket = JoinTicket {
        schema: RECORD_SCHEMA_VERSION,
        ticket_id,
        session_id,
        issued_at: now,
    };
    (record, ticket)
}

/// Seats `opponent` and activates the session.
///
/// # Errors
/// - [`MatchError::SessionNotJoinable`] unless the session can move to
///   `Active`, i.e. it is `Waiting` with the seat still free.
/// - [`MatchError::Unauthorized`] if the creator tries to take the
///   opponent seat.
pub fn bind_opponent(
    record: &SessionRecord,
    opponent: Participant,
) -> Result<SessionRecord, MatchError> {
    if !record.status.can_transition_to(SessionStatus::Active)
        || record.opponent.is_some()
    {
        return Err(MatchError::SessionNotJoinable(record.session_id.clone()));
    }
    if opponent.id == record.creator.id {
        return Err(MatchError::Unauthorized {
            session_id: record.session_id.clone(),
            player: opponent.id,
        });
    }

    let mut next = record.clone();
    next.opponent = Some(opponent);
    next.join_ticket = None;
    next.status = SessionStatus::Active;
    next.version += 1;
    Ok(next)
}

/// Records a move the oracle has accepted and returns the next record
/// together with the move as appended.
///
/// The side to move is taken from the record, so callers must have
/// already checked that the actor owns `record.active_color`. The color
/// flips on every move, including the last one; a checkmate is won by
/// the mover.
///
/// # Errors
/// [`MatchError::SessionNotActive`] unless the session is `Active`.
pub fn apply_verdict(
    record: &SessionRecord,
    notation: &str,
    verdict: Verdict,
    now: DateTime<Utc>,
) -> Result<(SessionRecord, MoveRecord), MatchError> {
    if record.status != SessionStatus::Active {
        return Err(MatchError::SessionNotActive {
            session_id: record.session_id.clone(),
            status: record.status,
        });
    }

    let mover = record.active_color;
    let applied = MoveRecord {
        ply: u32::try_from(record.moves.len() + 1).unwrap_or(u32::MAX),
        notation: notation.to_owned(),
        color: mover,
        played_at: now,
    };

    let mut next = record.clone();
    next.moves.push(applied.clone());
    next.position = verdict.position;
    next.active_color = mover.flip();
    next.last_move_at = Some(now);
    next.version += 1;

    if let Some(reason) = verdict.outcome.end_reason() {
        next.status = SessionStatus::Completed;
        next.result = Some(MatchResult {
            winner: (!reason.is_draw()).then_some(mover),
            reason,
        });
    }
    Ok((next, applied))
}

/// The color `player` plays in `record`, if they have a seat.
pub fn color_of(record: &SessionRecord, player: PlayerId) -> Option<Color> {
    record.color_of(player)
}

/// Generates a random 32-character hex string (128 bits of entropy).
///
/// Used for join tickets: anyone holding one can claim the opponent
/// seat, so it must not be guessable.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
