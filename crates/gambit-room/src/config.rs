//! Room configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by every room a
/// [`Coordinator`](crate::Coordinator) spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// How long an ordered broadcast may wait for a missing earlier
    /// version before the room gives up on it and moves on.
    ///
    /// Out-of-order arrivals are normal when two processes commit back to
    /// back. A version that never arrives was lost by the event bus; its
    /// effect is still in the record any later sync reads. Default: 250 ms.
    pub reorder_window: Duration,

    /// Capacity of each room actor's command channel. Broadcasters wait
    /// when it is full. Default: 64.
    pub channel_size: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            reorder_window: Duration::from_millis(250),
            channel_size: 64,
        }
    }
}
