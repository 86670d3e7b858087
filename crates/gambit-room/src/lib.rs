//! Realtime fan-out for Gambit sessions.
//!
//! Each session with at least one attached connection gets a room: an
//! isolated Tokio task (actor model) that owns the session's broadcast
//! group and delivers events in record-version order.
//!
//! # Key types
//!
//! - [`Coordinator`] binds connections to rooms and routes broadcasts
//! - [`Broadcast`] is what gets delivered, ordered or immediate
//! - [`RoomConfig`] holds the reorder window and channel sizing

mod config;
mod coordinator;
mod error;
mod room;

pub use config::RoomConfig;
pub use coordinator::{Coordinator, events_topic};
pub use error::RoomError;
pub use room::{Broadcast, ConnectionSender};
