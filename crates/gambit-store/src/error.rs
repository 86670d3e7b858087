//! Error types for the store layer.

use std::time::Duration;

/// Errors a [`SessionStore`](crate::SessionStore) backend can report.
///
/// Both variants mean "the store could not answer"; they never mean the
/// key is missing or the version is stale. Those are ordinary outcomes
/// carried by `Option` and [`CasOutcome`](crate::CasOutcome).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected the call or could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within the configured bound.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}
