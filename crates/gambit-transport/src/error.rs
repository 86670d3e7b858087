//! Error types for the transport layer.

/// Errors that can occur while accepting or using a realtime connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer went away or the socket was closed underneath us.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing a frame to the peer failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a frame from the peer failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener or completing the upgrade handshake failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}
