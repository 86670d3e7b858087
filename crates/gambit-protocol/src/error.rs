//! Error types for the protocol layer.

/// Errors that can occur while turning messages or records into bytes
/// and back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (Rust value → bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (bytes → Rust value).
    ///
    /// Malformed JSON, a missing field, or an unknown `type` tag all end
    /// up here.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The bytes decoded, but the message breaks a protocol rule
    /// (e.g. a request arriving before the handshake).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
