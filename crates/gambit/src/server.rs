//! `GambitServer` builder and server loop.
//!
//! This is the entry point for running a Gambit match server. It ties
//! together all the layers: transport → protocol → session → room.

use std::sync::Arc;
use std::time::Duration;

use gambit_protocol::{Codec, JsonCodec};
use gambit_room::{Coordinator, RoomConfig};
use gambit_session::{
    Authenticator, MatchConfig, MoveOracle, MovePipeline, SessionService,
};
use gambit_store::{BoundedStore, EventBus, SessionStore};
use gambit_transport::{Transport, WebSocketTransport};
use serde::{Deserialize, Serialize};

use crate::GambitError;
use crate::handler::handle_connection;

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Everything a server needs to know before it starts accepting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address. Default: `127.0.0.1:8080`.
    pub bind_addr: String,

    /// Upper bound on any single store call. A call that takes longer
    /// fails the request with `StoreUnavailable`. Default: 2 s.
    pub store_timeout: Duration,

    /// How long a new connection has to send its `Handshake`.
    /// Default: 5 s.
    pub handshake_timeout: Duration,

    /// A connection silent for this long is closed. Clients keep it open
    /// with `Heartbeat`. Default: 30 s.
    pub idle_timeout: Duration,

    pub matches: MatchConfig,
    pub rooms: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            store_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            matches: MatchConfig::default(),
            rooms: RoomConfig::default(),
        }
    }
}

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. Nothing in
/// here is a lock around session state: sessions live in the store, and
/// the only in-process table (connection bindings) sits inside the
/// coordinator.
pub(crate) struct ServerState<A, S, O, C> {
    pub(crate) pipeline: MovePipeline<BoundedStore<S>, O>,
    pub(crate) coordinator: Coordinator<BoundedStore<S>>,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

impl<A, S: SessionStore, O: MoveOracle, C> ServerState<A, S, O, C> {
    pub(crate) fn sessions(&self) -> &SessionService<BoundedStore<S>> {
        self.pipeline.sessions()
    }
}

/// Builder for configuring and starting a Gambit server.
///
/// # Example
///
/// ```rust,ignore
/// use gambit::prelude::*;
///
/// let server = GambitServer::builder()
///     .bind("0.0.0.0:8080")
///     .store_timeout(Duration::from_secs(1))
///     .build(my_auth, MemoryStore::new(), my_engine)
///     .await?;
/// server.run().await
/// ```
pub struct GambitServerBuilder {
    config: ServerConfig,
}

impl GambitServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Starts from a complete configuration, e.g. one read from a file.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets session TTLs and the join retry limit.
    pub fn match_config(mut self, config: MatchConfig) -> Self {
        self.config.matches = config;
        self
    }

    /// Sets the reorder window and room channel sizing.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.rooms = config;
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Binds the listener and assembles the server.
    ///
    /// `store` is wrapped so every call is bounded by `store_timeout`.
    /// It is also the event bus that carries broadcasts between every
    /// server process sharing it. Uses `JsonCodec` and
    /// `WebSocketTransport`.
    pub async fn build<A, S, O>(
        self,
        auth: A,
        store: S,
        oracle: O,
    ) -> Result<GambitServer<A, S, O, JsonCodec>, GambitError>
    where
        A: Authenticator,
        S: SessionStore + EventBus,
        O: MoveOracle,
    {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let store = BoundedStore::new(store, self.config.store_timeout);
        let sessions = Arc::new(SessionService::new(
            store,
            self.config.matches.clone(),
        ));
        let coordinator =
            Coordinator::new(Arc::clone(&sessions), self.config.rooms.clone());
        let pipeline = MovePipeline::new(sessions, oracle);

        let state = Arc::new(ServerState {
            pipeline,
            coordinator,
            auth,
            codec: JsonCodec,
            config: self.config,
        });

        Ok(GambitServer { transport, state })
    }
}

impl Default for GambitServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Gambit match server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct GambitServer<A, S, O, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, S, O, C>>,
}

impl GambitServer<(), (), (), ()> {
    /// Creates a new builder.
    pub fn builder() -> GambitServerBuilder {
        GambitServerBuilder::new()
    }
}

impl<A, S, O, C> GambitServer<A, S, O, C>
where
    A: Authenticator,
    S: SessionStore + EventBus,
    O: MoveOracle,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each
    /// one. Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), GambitError> {
        tracing::info!(
            bind_addr = %self.state.config.bind_addr,
            "Gambit server running"
        );

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default_timeouts() {
        let config = ServerConfig::default();
        assert_eq!(config.store_timeout, Duration::from_secs(2));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_setters_override_defaults() {
        let builder = GambitServerBuilder::new()
            .bind("0.0.0.0:9000")
            .store_timeout(Duration::from_millis(500))
            .idle_timeout(Duration::from_secs(10));

        assert_eq!(builder.config.bind_addr, "0.0.0.0:9000");
        assert_eq!(builder.config.store_timeout, Duration::from_millis(500));
        assert_eq!(builder.config.idle_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.handshake_timeout, Duration::from_secs(5));
    }
}
