//! Error types for the session layer.

use gambit_protocol::{
    Color, ErrorKind, PlayerId, ServerEvent, SessionId, SessionStatus,
};
use gambit_store::StoreError;

/// Returned by an [`Authenticator`](crate::Authenticator) when a token is
/// rejected.
#[derive(Debug, thiserror::Error)]
#[error("authentication failed: {0}")]
pub struct AuthError(pub String);

/// Broad grouping of [`MatchError`]s, used to pick a log level and to
/// decide whether a client may simply try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was wrong. Retrying it unchanged will fail.
    Client,
    /// Someone else changed the session first. Re-read and retry.
    Conflict,
    /// The store could not answer. Retry later.
    Infrastructure,
    /// A stored record could not be understood.
    Corrupt,
}

/// Everything that can go wrong creating, joining, or playing a session.
///
/// No variant leaves partial state behind: each is returned before the
/// final conditional write, or instead of it.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The ticket is unknown, expired, already used, or belongs to a
    /// different session.
    #[error("join ticket for session {0} is invalid, expired, or already used")]
    TicketInvalid(SessionId),

    /// The session does not exist or has expired.
    #[error("session {0} not found")]
    SessionGone(SessionId),

    /// The session already has an opponent (or has finished).
    #[error("session {0} is not accepting an opponent")]
    SessionNotJoinable(SessionId),

    /// The join kept losing compare-and-set races.
    #[error("join of session {session_id} failed after {attempts} attempts")]
    JoinFailed {
        session_id: SessionId,
        attempts: u32,
    },

    /// The player has no seat in the session, or may not perform this
    /// action on it.
    #[error("player {player} may not do that in session {session_id}")]
    Unauthorized {
        session_id: SessionId,
        player: PlayerId,
    },

    /// Moves are only accepted while the session is active.
    #[error("session {session_id} is {status}, not active")]
    SessionNotActive {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("it is {to_move}'s turn in session {session_id}")]
    NotYourTurn {
        session_id: SessionId,
        to_move: Color,
    },

    #[error("move {notation} is illegal in session {session_id}")]
    IllegalMove {
        session_id: SessionId,
        notation: String,
    },

    #[error("move {notation:?} is not valid notation")]
    BadMoveFormat {
        session_id: SessionId,
        notation: String,
    },

    /// The session changed between read and write. Nothing was written.
    #[error("session {0} was modified concurrently")]
    Conflict(SessionId),

    #[error("store unavailable: {source}")]
    StoreUnavailable {
        session_id: Option<SessionId>,
        #[source]
        source: StoreError,
    },

    /// A stored record failed to decode, was written by a newer schema,
    /// or could not be encoded.
    #[error("corrupt record: {reason}")]
    CorruptRecord {
        session_id: Option<SessionId>,
        reason: String,
    },
}

impl MatchError {
    pub(crate) fn store(session_id: Option<&SessionId>, source: StoreError) -> Self {
        Self::StoreUnavailable {
            session_id: session_id.cloned(),
            source,
        }
    }

    pub(crate) fn corrupt(
        session_id: Option<&SessionId>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CorruptRecord {
            session_id: session_id.cloned(),
            reason: reason.into(),
        }
    }

    /// The session this error is about, when known.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::TicketInvalid(id)
            | Self::SessionGone(id)
            | Self::SessionNotJoinable(id)
            | Self::Conflict(id) => Some(id),
            Self::JoinFailed { session_id, .. }
            | Self::Unauthorized { session_id, .. }
            | Self::SessionNotActive { session_id, .. }
            | Self::NotYourTurn { session_id, .. }
            | Self::IllegalMove { session_id, .. }
            | Self::BadMoveFormat { session_id, .. } => Some(session_id),
            Self::StoreUnavailable { session_id, .. }
            | Self::CorruptRecord { session_id, .. } => session_id.as_ref(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict(_) | Self::JoinFailed { .. } => ErrorClass::Conflict,
            Self::StoreUnavailable { .. } => ErrorClass::Infrastructure,
            Self::CorruptRecord { .. } => ErrorClass::Corrupt,
            _ => ErrorClass::Client,
        }
    }

    /// The wire category sent back to the client.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TicketInvalid(_) => ErrorKind::TicketInvalid,
            Self::SessionGone(_) => ErrorKind::SessionGone,
            Self::SessionNotJoinable(_) => ErrorKind::SessionNotJoinable,
            Self::JoinFailed { .. } => ErrorKind::JoinFailed,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::SessionNotActive { .. } => ErrorKind::SessionNotActive,
            Self::NotYourTurn { .. } => ErrorKind::NotYourTurn,
            Self::IllegalMove { .. } => ErrorKind::IllegalMove,
            Self::BadMoveFormat { .. } => ErrorKind::BadMoveFormat,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::CorruptRecord { .. } => ErrorKind::CorruptRecord,
        }
    }

    /// The [`ServerEvent::Failure`] reported to the requesting connection.
    pub fn to_failure(&self) -> ServerEvent {
        ServerEvent::failure(self.session_id().cloned(), self.kind(), self.to_string())
    }
}
