//! Wire protocol and stored record layout for Gambit.
//!
//! This crate defines the shapes that leave the process, in either
//! direction:
//!
//! - **Wire messages** ([`Envelope`], [`ClientRequest`], [`ServerEvent`],
//!   [`SystemMessage`]) exchanged with players over the realtime link.
//! - **Records** ([`SessionRecord`], [`JoinTicket`]) written to the
//!   shared store.
//! - **Codec** ([`Codec`], [`JsonCodec`]) converting both to bytes.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session / Room
//!                     Protocol (records)  → Store (bytes)
//! ```

mod codec;
mod error;
mod message;
mod record;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{
    Channel, ClientRequest, Envelope, ErrorKind, Payload, ServerEvent,
    SystemMessage,
};
pub use record::{
    INITIAL_POSITION, JoinTicket, MoveRecord, RECORD_SCHEMA_VERSION,
    SessionRecord,
};
pub use types::{
    Color, EndReason, MatchResult, Participant, PlayerId, Role, SessionId,
    SessionStatus, TicketId,
};
