//! Authentication hook for validating player identity.
//!
//! Gambit doesn't verify identities itself. The embedding application
//! implements [`Authenticator`] (JWT check, session cookie lookup, API
//! call...) and the server calls it once per connection, during the
//! handshake. Every request on that connection then acts as the returned
//! [`PlayerId`].

use gambit_protocol::PlayerId;

use crate::AuthError;

/// Validates a client's auth token and returns their identity.
///
/// # Example
///
/// ```rust
/// use gambit_protocol::PlayerId;
/// use gambit_session::{AuthError, Authenticator};
///
/// /// Uses the token itself as the player ID. Development only.
/// struct DevAuthenticator;
///
/// impl Authenticator for DevAuthenticator {
///     async fn authenticate(&self, token: &str) -> Result<PlayerId, AuthError> {
///         let id: u64 = token
///             .parse()
///             .map_err(|_| AuthError("token must be a number".into()))?;
///         Ok(PlayerId(id))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns the player's identity.
    ///
    /// Called when a client sends
    /// [`SystemMessage::Handshake`](gambit_protocol::SystemMessage::Handshake).
    fn authenticate(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<PlayerId, AuthError>> + Send;
}
