//! The move pipeline: validate a submitted move, ask the oracle, and
//! commit the result with a single conditional write.

use std::sync::Arc;

use chrono::Utc;
use gambit_protocol::{
    MoveRecord, PlayerId, ServerEvent, SessionId, SessionRecord,
    SessionStatus,
};
use gambit_store::{CasOutcome, SessionStore};

use crate::{MatchError, MoveOracle, OracleRejection, SessionService, lifecycle};

/// A move that has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    /// The record as stored after the move.
    pub record: SessionRecord,
    /// The move just appended to `record.moves`.
    pub applied: MoveRecord,
    /// Whether the side now to move is in check.
    pub check: bool,
}

impl MoveOutcome {
    /// The `MoveApplied` broadcast describing this move.
    pub fn event(&self) -> ServerEvent {
        let record = &self.record;
        let result = record.result.as_ref();
        ServerEvent::MoveApplied {
            session_id: record.session_id.clone(),
            version: record.version,
            notation: self.applied.notation.clone(),
            color: self.applied.color,
            next_turn: record.active_color,
            position: record.position.clone(),
            check: self.check,
            terminal: record.status == SessionStatus::Completed,
            status: record.status,
            end_reason: result.map(|r| r.reason),
            winner: result.and_then(|r| r.winner),
        }
    }
}

/// Applies moves to sessions held by a [`SessionService`].
pub struct MovePipeline<S, O> {
    sessions: Arc<SessionService<S>>,
    oracle: O,
}

impl<S: SessionStore, O: MoveOracle> MovePipeline<S, O> {
    pub fn new(sessions: Arc<SessionService<S>>, oracle: O) -> Self {
        Self { sessions, oracle }
    }

    pub fn sessions(&self) -> &Arc<SessionService<S>> {
        &self.sessions
    }

    /// Plays `notation` for `actor` in `session_id`.
    ///
    /// Checks run in this order, and the first failure wins:
    ///
    /// | check | error |
    /// |---|---|
    /// | record exists | `SessionGone` |
    /// | actor has a seat | `Unauthorized` |
    /// | status is `Active` | `SessionNotActive` |
    /// | actor's color is to move | `NotYourTurn` |
    /// | oracle parses the move | `BadMoveFormat` |
    /// | oracle accepts the move | `IllegalMove` |
    /// | record unchanged since load | `Conflict` |
    ///
    /// A `Conflict` is returned as-is, never retried here: the move was
    /// judged against a position that no longer exists.
    pub async fn apply_move(
        &self,
        session_id: &SessionId,
        actor: PlayerId,
        notation: &str,
    ) -> Result<MoveOutcome, MatchError> {
        let record = self.sessions.load(session_id).await?;

        let Some(color) = lifecycle::color_of(&record, actor) else {
            return Err(MatchError::Unauthorized {
                session_id: session_id.clone(),
                player: actor,
            });
        };
        if record.status != SessionStatus::Active {
            return Err(MatchError::SessionNotActive {
                session_id: session_id.clone(),
                status: record.status,
            });
        }
        if color != record.active_color {
            return Err(MatchError::NotYourTurn {
                session_id: session_id.clone(),
                to_move: record.active_color,
            });
        }

        let verdict = self
            .oracle
            .evaluate(&record.position, notation)
            .map_err(|rejection| match rejection {
                OracleRejection::Illegal => MatchError::IllegalMove {
                    session_id: session_id.clone(),
                    notation: notation.to_owned(),
                },
                OracleRejection::Malformed => MatchError::BadMoveFormat {
                    session_id: session_id.clone(),
                    notation: notation.to_owned(),
                },
            })?;
        let check = verdict.check;

        let (next, applied) =
            lifecycle::apply_verdict(&record, notation, verdict, Utc::now())?;
        match self.sessions.commit(&next, record.version).await? {
            CasOutcome::Applied => {}
            CasOutcome::Conflict => {
                tracing::warn!(
                    %session_id,
                    player_id = %actor,
                    version = record.version,
                    "move lost a write race"
                );
                return Err(MatchError::Conflict(session_id.clone()));
            }
            CasOutcome::Absent => {
                return Err(MatchError::SessionGone(session_id.clone()));
            }
        }

        tracing::info!(
            %session_id,
            player_id = %actor,
            version = next.version,
            notation,
            "move applied"
        );
        if let Some(result) = &next.result {
            tracing::info!(%session_id, reason = %result.reason, "session completed");
        }

        Ok(MoveOutcome {
            record: next,
            applied,
            check,
        })
    }
}
