//! # Gambit
//!
//! Session coordinator for two-player chess matches.
//!
//! Gambit keeps the authoritative record of each match in a shared
//! key-value store, so several server processes can serve the same
//! players. It takes care of seating an opponent with a single-use join
//! ticket, validating and committing moves with optimistic concurrency,
//! and fanning accepted moves out to everyone watching the match. Chess
//! rules are not part of it: the embedding application supplies a
//! [`MoveOracle`](gambit_session::MoveOracle).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gambit::prelude::*;
//!
//! // Implement Authenticator and MoveOracle, then:
//! // gambit::logging::init();
//! // let server = GambitServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .build(my_auth, MemoryStore::new(), my_engine)
//! //     .await?;
//! // server.run().await
//! ```

mod error;
mod handler;
pub mod logging;
mod server;

pub use error::GambitError;
pub use server::{GambitServer, GambitServerBuilder, PROTOCOL_VERSION, ServerConfig};

pub mod prelude {
    //! Everything needed to run a server and talk to it.

    pub use crate::{
        GambitError, GambitServer, GambitServerBuilder, PROTOCOL_VERSION,
        ServerConfig,
    };
    pub use gambit_protocol::{
        Channel, ClientRequest, Codec, Color, EndReason, Envelope, ErrorKind,
        JsonCodec, Participant, Payload, PlayerId, Role, ServerEvent, SessionId,
        SessionRecord, SessionStatus, SystemMessage, TicketId,
    };
    pub use gambit_room::RoomConfig;
    pub use gambit_session::{
        AuthError, Authenticator, DrawRule, MatchConfig, MatchError,
        MoveOracle, OracleRejection, Outcome, Verdict,
    };
    #[cfg(feature = "redis")]
    pub use gambit_store::RedisStore;
    pub use gambit_store::{EventBus, MemoryStore, SessionStore, StoreError};
}
