//! Tunables for session storage and joining.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`SessionService`](crate::SessionService).
///
/// Start from `MatchConfig::default()` and override what you need:
///
/// ```rust
/// use std::time::Duration;
/// use gambit_session::MatchConfig;
///
/// let config = MatchConfig {
///     ticket_ttl: Duration::from_secs(300),
///     ..MatchConfig::default()
/// };
/// assert_eq!(config.join_retry_limit, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// How long a session record lives after its last write.
    ///
    /// Every accepted mutation resets it. Default: 24 hours.
    pub session_ttl: Duration,

    /// How long an unused join ticket stays valid. Must be shorter than
    /// `session_ttl`. Default: 1 hour.
    pub ticket_ttl: Duration,

    /// How many times a join re-reads the session and retries after
    /// losing a compare-and-set race, before giving up with
    /// `JoinFailed`. Default: 3.
    pub join_retry_limit: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(24 * 60 * 60),
            ticket_ttl: Duration::from_secs(60 * 60),
            join_retry_limit: 3,
        }
    }
}
