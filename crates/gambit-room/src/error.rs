//! Error types for the room layer.

use gambit_protocol::{ErrorKind, ServerEvent, SessionId};
use gambit_session::MatchError;
use gambit_store::StoreError;

/// Errors that can occur while binding connections to rooms.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Loading or authorizing against the session failed.
    #[error(transparent)]
    Match(#[from] MatchError),

    /// The room's actor stopped or its command channel closed.
    #[error("room for session {0} is unavailable")]
    Unavailable(SessionId),

    /// Subscribing to the session's event topic failed.
    #[error("event bus unavailable for session {session_id}: {source}")]
    Events {
        session_id: SessionId,
        #[source]
        source: StoreError,
    },
}

impl RoomError {
    /// The wire category reported to the requesting connection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Match(err) => err.kind(),
            // Nothing was changed; attaching again starts a fresh room.
            Self::Unavailable(_) => ErrorKind::Conflict,
            Self::Events { .. } => ErrorKind::StoreUnavailable,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Match(err) => err.session_id(),
            Self::Unavailable(id) => Some(id),
            Self::Events { session_id, .. } => Some(session_id),
        }
    }

    /// The [`ServerEvent::Failure`] reported to the requesting connection.
    pub fn to_failure(&self) -> ServerEvent {
        match self {
            Self::Match(err) => err.to_failure(),
            _ => ServerEvent::failure(
                self.session_id().cloned(),
                self.kind(),
                self.to_string(),
            ),
        }
    }
}
