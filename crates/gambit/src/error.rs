//! Unified error type for the Gambit server.

use gambit_protocol::ProtocolError;
use gambit_room::RoomError;
use gambit_session::{AuthError, MatchError};
use gambit_store::StoreError;
use gambit_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `gambit` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum GambitError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The shared store could not be reached or configured.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A session-level error (ticket, turn, conflict, ...).
    #[error(transparent)]
    Match(#[from] MatchError),

    /// A room-level error (binding, dead actor).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The handshake token was rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
}
