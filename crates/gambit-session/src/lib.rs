//! Match sessions for Gambit: who plays whom, whose turn it is, and how
//! each move becomes authoritative.
//!
//! 1. **Lifecycle** ([`lifecycle`]) — pure transitions
//!    `Waiting → Active → Completed` over a [`SessionRecord`].
//! 2. **Service** ([`SessionService`]) — create, join (single-use
//!    tickets), fetch, and cancel, against a shared store.
//! 3. **Pipeline** ([`MovePipeline`]) — authorize, check the turn, ask
//!    the [`MoveOracle`], and commit with compare-and-set.
//! 4. **Authentication** ([`Authenticator`]) — token → [`PlayerId`] at
//!    handshake time.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)     ← broadcasts what this crate commits
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Store (below)          ← versioned records with TTLs
//! ```
//!
//! [`SessionRecord`]: gambit_protocol::SessionRecord
//! [`PlayerId`]: gambit_protocol::PlayerId

#![allow(async_fn_in_trait)]

mod auth;
mod config;
mod error;
pub mod lifecycle;
mod oracle;
mod pipeline;
mod records;
mod service;

pub use auth::Authenticator;
pub use config::MatchConfig;
pub use error::{AuthError, ErrorClass, MatchError};
pub use oracle::{DrawRule, MoveOracle, OracleRejection, Outcome, Verdict};
pub use pipeline::{MoveOutcome, MovePipeline};
pub use service::SessionService;
