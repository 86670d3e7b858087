//! Per-connection handler: handshake, auth, and request dispatch.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version
//!   2. Authenticate token → get PlayerId
//!   3. Send HandshakeAck → player is connected
//!   4. Spawn a writer task draining this connection's event channel
//!   5. Loop: receive envelopes → dispatch system messages or requests
//!
//! Events reach the socket only through the writer task, whether they are
//! private replies or room broadcasts, so one connection never has two
//! event writers racing each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use gambit_protocol::{
    ClientRequest, Codec, Color, Envelope, Participant, Payload, PlayerId,
    ProtocolError, ServerEvent, SessionId, SystemMessage,
};
use gambit_room::{Broadcast, ConnectionSender};
use gambit_session::{Authenticator, MoveOracle};
use gambit_store::{EventBus, SessionStore};
use gambit_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;

use crate::GambitError;
use crate::server::{PROTOCOL_VERSION, ServerState};

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// The socket plus this direction's envelope numbering.
struct Peer {
    conn: WebSocketConnection,
    seq: AtomicU64,
    start: Instant,
}

impl Peer {
    fn new(conn: WebSocketConnection) -> Self {
        Self {
            conn,
            seq: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn send(
        &self,
        codec: &impl Codec,
        payload: Payload,
    ) -> Result<(), GambitError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::reliable(seq, self.elapsed_ms(), payload);
        let bytes = codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn send_error(
        &self,
        codec: &impl Codec,
        code: u16,
        message: &str,
    ) -> Result<(), GambitError> {
        self.send(
            codec,
            Payload::System(SystemMessage::Error {
                code,
                message: message.to_string(),
            }),
        )
        .await
    }
}

/// Drop guard that unbinds the connection from its room when the handler
/// exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async unbind.
/// Unbinding never changes the session: a dropped socket is not a
/// resignation.
struct ConnectionGuard<A, S, O, C>
where
    A: Authenticator,
    S: SessionStore + EventBus,
    O: MoveOracle,
    C: Codec,
{
    conn_id: ConnectionId,
    state: Arc<ServerState<A, S, O, C>>,
}

impl<A, S, O, C> Drop for ConnectionGuard<A, S, O, C>
where
    A: Authenticator,
    S: SessionStore + EventBus,
    O: MoveOracle,
    C: Codec,
{
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if let Some(session_id) = state.coordinator.detach(conn_id).await {
                tracing::debug!(%conn_id, %session_id, "unbound on disconnect");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, S, O, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, S, O, C>>,
) -> Result<(), GambitError>
where
    A: Authenticator,
    S: SessionStore + EventBus,
    O: MoveOracle,
    C: Codec,
{
    let conn_id = conn.id();
    let peer = Arc::new(Peer::new(conn));
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let player_id = perform_handshake(&peer, &state).await?;
    tracing::info!(%conn_id, %player_id, "player authenticated");

    // --- Step 2: Writer task ---
    let (events, events_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_events(
        Arc::clone(&peer),
        Arc::clone(&state),
        events_rx,
    ));
    let _guard = ConnectionGuard {
        conn_id,
        state: Arc::clone(&state),
    };

    // --- Step 3: Message loop ---
    let ctx = RequestContext {
        conn_id,
        player_id,
        events,
    };
    loop {
        let data = match tokio::time::timeout(
            state.config.idle_timeout,
            peer.conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%player_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%player_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%player_id, "connection timed out");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(
                    %player_id, error = %e, "failed to decode envelope"
                );
                peer.send_error(&state.codec, 400, "malformed envelope")
                    .await?;
                continue;
            }
        };

        match envelope.payload {
            Payload::System(sys_msg) => {
                let should_close =
                    handle_system_message(&peer, &state, player_id, sys_msg)
                        .await?;
                if should_close {
                    break;
                }
            }
            Payload::Request(request) => {
                handle_request(&state, &ctx, request).await;
            }
            Payload::Event(_) => {
                tracing::debug!(%player_id, "ignoring event sent by client");
            }
        }
    }

    writer.abort();
    // _guard drops here → connection is unbound.
    Ok(())
}

/// Performs the initial handshake: receive Handshake, validate, auth, send Ack.
async fn perform_handshake<A, S, O, C>(
    peer: &Peer,
    state: &ServerState<A, S, O, C>,
) -> Result<PlayerId, GambitError>
where
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(
        state.config.handshake_timeout,
        peer.conn.recv(),
    )
    .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(GambitError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage(
                "handshake timed out".into(),
            )
            .into());
        }
    };

    let envelope: Envelope = state.codec.decode(&data)?;

    let (version, token) = match envelope.payload {
        Payload::System(SystemMessage::Handshake { version, token }) => {
            (version, token)
        }
        _ => {
            peer.send_error(&state.codec, 400, "expected Handshake").await?;
            return Err(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )
            .into());
        }
    };

    if version != PROTOCOL_VERSION {
        peer.send_error(
            &state.codec,
            400,
            &format!(
                "version mismatch: expected {PROTOCOL_VERSION}, got {version}"
            ),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage(
            "protocol version mismatch".into(),
        )
        .into());
    }

    let token_str = token.as_deref().unwrap_or("");
    let player_id = match state.auth.authenticate(token_str).await {
        Ok(pid) => pid,
        Err(e) => {
            peer.send_error(&state.codec, 401, "unauthorized").await?;
            return Err(GambitError::Auth(e));
        }
    };

    peer.send(
        &state.codec,
        Payload::System(SystemMessage::HandshakeAck {
            player_id,
            server_time: peer.elapsed_ms(),
        }),
    )
    .await?;

    Ok(player_id)
}

/// Drains the connection's event channel onto the socket.
async fn write_events<A, S, O, C>(
    peer: Arc<Peer>,
    state: Arc<ServerState<A, S, O, C>>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) where
    C: Codec,
{
    while let Some(event) = events.recv().await {
        if let Err(e) = peer.send(&state.codec, Payload::Event(event)).await {
            tracing::debug!(conn_id = %peer.conn.id(), error = %e, "write failed");
            break;
        }
    }
}

/// Handles a system message. Returns `true` if the connection should close.
async fn handle_system_message<A, S, O, C>(
    peer: &Peer,
    state: &ServerState<A, S, O, C>,
    player_id: PlayerId,
    msg: SystemMessage,
) -> Result<bool, GambitError>
where
    C: Codec,
{
    match msg {
        SystemMessage::Heartbeat { client_time } => {
            peer.send(
                &state.codec,
                Payload::System(SystemMessage::HeartbeatAck {
                    client_time,
                    server_time: peer.elapsed_ms(),
                }),
            )
            .await?;
        }

        SystemMessage::Disconnect { reason } => {
            tracing::info!(%player_id, %reason, "client disconnected");
            return Ok(true);
        }

        _ => {
            tracing::debug!(
                %player_id, "ignoring unexpected system message"
            );
        }
    }

    Ok(false)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

struct RequestContext {
    conn_id: ConnectionId,
    player_id: PlayerId,
    events: ConnectionSender,
}

impl RequestContext {
    /// Queues a private event for this connection only.
    fn reply(&self, event: ServerEvent) {
        // Fails only once the writer has stopped, i.e. the socket is gone.
        let _ = self.events.send(event);
    }

    fn participant(&self, display_name: Option<String>) -> Participant {
        let name =
            display_name.unwrap_or_else(|| self.player_id.to_string());
        Participant::new(self.player_id, name)
    }
}

/// Runs one request. Failures go back to this connection only; nothing
/// here can end the connection.
async fn handle_request<A, S, O, C>(
    state: &ServerState<A, S, O, C>,
    ctx: &RequestContext,
    request: ClientRequest,
) where
    S: SessionStore + EventBus,
    O: MoveOracle,
{
    let target = request.session_id().cloned();
    let result = dispatch(state, ctx, request).await;

    if let Err(err) = result {
        tracing::debug!(
            conn_id = %ctx.conn_id,
            player_id = %ctx.player_id,
            error = %err,
            "request rejected"
        );
        let mut failure = match &err {
            RequestError::Match(e) => e.to_failure(),
            RequestError::Room(e) => e.to_failure(),
        };
        // Errors raised before a session was resolved still name the
        // one the request was about.
        if let ServerEvent::Failure { session_id, .. } = &mut failure {
            if session_id.is_none() {
                *session_id = target;
            }
        }
        ctx.reply(failure);
    }
}

#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error(transparent)]
    Match(#[from] gambit_session::MatchError),
    #[error(transparent)]
    Room(#[from] gambit_room::RoomError),
}

async fn dispatch<A, S, O, C>(
    state: &ServerState<A, S, O, C>,
    ctx: &RequestContext,
    request: ClientRequest,
) -> Result<(), RequestError>
where
    S: SessionStore + EventBus,
    O: MoveOracle,
{
    let sessions = state.sessions();

    match request {
        ClientRequest::CreateSession { display_name } => {
            let creator = ctx.participant(display_name);
            let (record, ticket) = sessions.create_session(creator).await?;
            ctx.reply(ServerEvent::SessionCreated {
                session_id: record.session_id,
                position: record.position,
                color: Color::White,
                join_ticket_id: ticket.ticket_id,
                status: record.status,
            });
        }

        ClientRequest::JoinSession {
            session_id,
            ticket_id,
            display_name,
        } => {
            let opponent = ctx.participant(display_name);
            let record = sessions
                .join_session(&session_id, &ticket_id, opponent.clone())
                .await?;
            ctx.reply(ServerEvent::SessionJoined {
                session_id: session_id.clone(),
                position: record.position.clone(),
                color: Color::Black,
                status: record.status,
            });
            let event = ServerEvent::OpponentJoined {
                session_id: session_id.clone(),
                opponent,
                status: record.status,
                version: record.version,
            };
            state
                .coordinator
                .broadcast(
                    &session_id,
                    Broadcast::Ordered {
                        version: record.version,
                        event,
                    },
                )
                .await;
        }

        ClientRequest::Attach { session_id } => {
            state
                .coordinator
                .attach(
                    ctx.conn_id,
                    &session_id,
                    ctx.player_id,
                    ctx.events.clone(),
                )
                .await?;
        }

        ClientRequest::Leave { session_id } => {
            if is_bound_to(state, ctx, &session_id).await {
                state.coordinator.detach(ctx.conn_id).await;
            }
            ctx.reply(ServerEvent::Left { session_id });
        }

        ClientRequest::SubmitMove {
            session_id,
            notation,
        } => {
            let outcome = state
                .pipeline
                .apply_move(&session_id, ctx.player_id, &notation)
                .await?;
            let event = outcome.event();
            // A submitter watching the room hears about its own move
            // there, in order with everything else.
            if !is_bound_to(state, ctx, &session_id).await {
                ctx.reply(event.clone());
            }
            state
                .coordinator
                .broadcast(
                    &session_id,
                    Broadcast::Ordered {
                        version: outcome.record.version,
                        event,
                    },
                )
                .await;
        }

        ClientRequest::FetchSession { session_id } => {
            let record = sessions.fetch(&session_id, ctx.player_id).await?;
            ctx.reply(ServerEvent::Snapshot { record });
        }

        ClientRequest::CancelSession { session_id } => {
            sessions.cancel_session(&session_id, ctx.player_id).await?;
            let event = ServerEvent::SessionCancelled {
                session_id: session_id.clone(),
            };
            if !is_bound_to(state, ctx, &session_id).await {
                ctx.reply(event.clone());
            }
            state
                .coordinator
                .broadcast(&session_id, Broadcast::Notice(event))
                .await;
        }
    }

    Ok(())
}

async fn is_bound_to<A, S, O, C>(
    state: &ServerState<A, S, O, C>,
    ctx: &RequestContext,
    session_id: &SessionId,
) -> bool
where
    S: SessionStore + EventBus,
{
    state.coordinator.bound_session(ctx.conn_id).await.as_ref() == Some(session_id)
}
