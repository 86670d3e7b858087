//! The session service: creating, joining, reading, and cancelling
//! sessions against a shared [`SessionStore`].
//!
//! # Concurrency
//!
//! The service holds no in-process state of its own, so any number of
//! server processes can run one against the same store. Correctness
//! rests on two store primitives:
//!
//! - `take` makes ticket consumption single-use: when N opponents race
//!   one ticket, exactly one of them gets it.
//! - `compare_and_set` on the record version makes every mutation
//!   all-or-nothing: a writer holding a stale version changes nothing.

use chrono::Utc;
use gambit_protocol::{
    JoinTicket, Participant, PlayerId, SessionId, SessionRecord,
    SessionStatus, TicketId,
};
use gambit_store::{CasOutcome, SessionStore};

use crate::records::{
    decode_session, decode_ticket, encode_session, encode_ticket,
    session_key, ticket_key,
};
use crate::{MatchConfig, MatchError, lifecycle};

/// Session operations over a store `S`.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct SessionService<S> {
    store: S,
    config: MatchConfig,
}

impl<S: SessionStore> SessionService<S> {
    pub fn new(store: S, config: MatchConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------

    /// Opens a new `Waiting` session with `creator` as white and issues
    /// its join ticket.
    ///
    /// The record is written first, then the ticket. If the ticket write
    /// fails the call fails; the orphaned record is unreachable (nobody
    /// holds a ticket for it) and expires with its TTL.
    pub async fn create_session(
        &self,
        creator: Participant,
    ) -> Result<(SessionRecord, JoinTicket), MatchError> {
        let creator_id = creator.id;
        let (record, ticket) = lifecycle::new_session(creator, Utc::now());
        let session_id = &record.session_id;

        self.store
            .put(
                &session_key(session_id),
                encode_session(&record)?,
                self.config.session_ttl,
            )
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?;

        self.store
            .put(
                &ticket_key(&ticket.ticket_id),
                encode_ticket(&ticket)?,
                self.config.ticket_ttl,
            )
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?;

        tracing::info!(%session_id, player_id = %creator_id, "session created");
        Ok((record, ticket))
    }

    // -----------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------

    /// Seats `opponent` in `session_id` by consuming `ticket_id`.
    ///
    /// 1. Without consuming anything, reject a ticket that is missing or
    ///    was issued for another session, a session that is gone, and a
    ///    creator trying to play themselves. A mistaken request must not
    ///    burn a ticket that someone else could still use.
    /// 2. Atomically take the ticket. Absent → `TicketInvalid`; this is
    ///    where concurrent joins on one ticket are decided.
    /// 3. Load the record and bind the opponent with a compare-and-set.
    ///    On `Conflict`, re-read and retry up to `join_retry_limit` times,
    ///    then fail with `JoinFailed`.
    ///
    /// A ticket is gone once step 2 succeeds, even if step 3 fails.
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        ticket_id: &TicketId,
        opponent: Participant,
    ) -> Result<SessionRecord, MatchError> {
        let ticket_key = ticket_key(ticket_id);
        let invalid = || MatchError::TicketInvalid(session_id.clone());

        // Pre-flight: read-only checks.
        let peeked = self
            .store
            .get(&ticket_key)
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?
            .ok_or_else(invalid)?;
        if decode_ticket(peeked)?.session_id != *session_id {
            tracing::debug!(%session_id, "ticket issued for another session");
            return Err(invalid());
        }
        let current = self.load(session_id).await?;
        if current.creator.id == opponent.id {
            return Err(MatchError::Unauthorized {
                session_id: session_id.clone(),
                player: opponent.id,
            });
        }

        // Consume.
        let taken = self
            .store
            .take(&ticket_key)
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?
            .ok_or_else(invalid)?;
        if decode_ticket(taken)?.session_id != *session_id {
            return Err(invalid());
        }

        // Bind.
        let attempts = self.config.join_retry_limit + 1;
        for attempt in 1..=attempts {
            let record = self.load(session_id).await?;
            let next = lifecycle::bind_opponent(&record, opponent.clone())?;

            match self.commit(&next, record.version).await? {
                CasOutcome::Applied => {
                    tracing::info!(
                        %session_id,
                        player_id = %opponent.id,
                        version = next.version,
                        "opponent joined"
                    );
                    return Ok(next);
                }
                CasOutcome::Conflict => {
                    tracing::warn!(%session_id, attempt, "join lost a write race");
                }
                CasOutcome::Absent => {
                    return Err(MatchError::SessionGone(session_id.clone()));
                }
            }
        }

        Err(MatchError::JoinFailed {
            session_id: session_id.clone(),
            attempts,
        })
    }

    // -----------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------

    /// Loads the current record.
    ///
    /// # Errors
    /// [`MatchError::SessionGone`] if it doesn't exist or has expired.
    pub async fn load(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionRecord, MatchError> {
        let value = self
            .store
            .get(&session_key(session_id))
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?
            .ok_or_else(|| MatchError::SessionGone(session_id.clone()))?;

        decode_session(session_id, value).inspect_err(|err| {
            tracing::warn!(%session_id, error = %err, "unreadable session record");
        })
    }

    /// Loads the record on behalf of `actor`, who must have a seat.
    pub async fn fetch(
        &self,
        session_id: &SessionId,
        actor: PlayerId,
    ) -> Result<SessionRecord, MatchError> {
        let record = self.load(session_id).await?;
        if !record.is_participant(actor) {
            return Err(MatchError::Unauthorized {
                session_id: session_id.clone(),
                player: actor,
            });
        }
        Ok(record)
    }

    // -----------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------

    /// Withdraws a session nobody has joined yet.
    ///
    /// Only the creator may cancel, and only while `Waiting`. The record
    /// is removed with a version-guarded delete, so a join that lands
    /// first wins and the cancel reports `SessionNotJoinable`. The ticket
    /// delete afterwards is best effort: a leftover ticket points at a
    /// missing session and fails with `SessionGone`.
    ///
    /// Returns the record as it was just before removal.
    pub async fn cancel_session(
        &self,
        session_id: &SessionId,
        actor: PlayerId,
    ) -> Result<SessionRecord, MatchError> {
        let record = self.load(session_id).await?;
        if record.creator.id != actor {
            return Err(MatchError::Unauthorized {
                session_id: session_id.clone(),
                player: actor,
            });
        }
        if record.status != SessionStatus::Waiting {
            return Err(MatchError::SessionNotJoinable(session_id.clone()));
        }

        let outcome = self
            .store
            .compare_and_delete(&session_key(session_id), record.version)
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))?;
        match outcome {
            CasOutcome::Applied => {}
            CasOutcome::Conflict => {
                return Err(MatchError::SessionNotJoinable(session_id.clone()));
            }
            CasOutcome::Absent => {
                return Err(MatchError::SessionGone(session_id.clone()));
            }
        }

        if let Some(ticket_id) = &record.join_ticket {
            if let Err(err) = self.store.delete(&ticket_key(ticket_id)).await {
                tracing::debug!(%session_id, error = %err, "ticket cleanup failed");
            }
        }

        tracing::info!(%session_id, player_id = %actor, "session cancelled");
        Ok(record)
    }

    // -----------------------------------------------------------------
    // Write-back
    // -----------------------------------------------------------------

    /// Conditionally replaces the stored record with `next`, provided the
    /// store still holds `expected_version`. Resets the session TTL.
    pub(crate) async fn commit(
        &self,
        next: &SessionRecord,
        expected_version: u64,
    ) -> Result<CasOutcome, MatchError> {
        let session_id = &next.session_id;
        self.store
            .compare_and_set(
                &session_key(session_id),
                expected_version,
                encode_session(next)?,
                self.config.session_ttl,
            )
            .await
            .map_err(|e| MatchError::store(Some(session_id), e))
    }
}
