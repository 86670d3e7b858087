//! Coordinator: binds connections to session rooms and routes
//! broadcasts to them.
//!
//! Broadcasts are published on the session's event topic
//! (`events:{session_id}`) rather than handed to a local room directly.
//! Every process with a room for that session is subscribed, so a move
//! committed here reaches a player connected to any other process.

use std::collections::HashMap;
use std::sync::Arc;

use gambit_protocol::{PlayerId, SessionId, SessionRecord};
use gambit_session::{MatchError, SessionService};
use gambit_store::{EventBus, SessionStore, Subscription};
use gambit_transport::ConnectionId;
use tokio::sync::Mutex;

use crate::room::{Attachment, RoomHandle, spawn_room};
use crate::{Broadcast, ConnectionSender, RoomConfig, RoomError};

/// How many times an attach re-reads the record when the room has
/// already delivered past it.
const ATTACH_ATTEMPTS: u32 = 3;

/// The bus topic carrying `session_id`'s broadcasts.
pub fn events_topic(session_id: &SessionId) -> String {
    format!("events:{session_id}")
}

#[derive(Default)]
struct Bindings {
    rooms: HashMap<SessionId, RoomHandle>,
    /// A connection is bound to at most one session at a time.
    connections: HashMap<ConnectionId, SessionId>,
}

/// Keeps the in-process broadcast groups for every session that has at
/// least one attached connection.
///
/// The coordinator never mutates session state. It reads the record to
/// authorize an attach and to give the newcomer its initial sync; every
/// change to a session goes through the session layer, and the caller
/// hands the result here with [`broadcast`](Self::broadcast).
///
/// Several coordinators (one per server process) may share one store;
/// they meet on the store's [`EventBus`].
pub struct Coordinator<S> {
    sessions: Arc<SessionService<S>>,
    config: RoomConfig,
    table: Mutex<Bindings>,
}

impl<S: SessionStore + EventBus> Coordinator<S> {
    pub fn new(sessions: Arc<SessionService<S>>, config: RoomConfig) -> Self {
        Self {
            sessions,
            config,
            table: Mutex::new(Bindings::default()),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Binds `connection_id` to the room of `session_id` on behalf of
    /// `player`.
    ///
    /// `player` must be the session's creator or its opponent. The new
    /// connection receives a private `Synced` carrying the record it was
    /// synced at; everyone else already in the room receives
    /// `PeerAttached`. A connection bound elsewhere is detached from its
    /// previous room first.
    ///
    /// # Errors
    /// Whatever loading the session fails with (`SessionGone`,
    /// `StoreUnavailable`, ...), `Unauthorized` for a non-participant, or
    /// [`RoomError::Unavailable`] if the room kept moving ahead of the
    /// store reads.
    pub async fn attach(
        &self,
        connection_id: ConnectionId,
        session_id: &SessionId,
        player: PlayerId,
        sender: ConnectionSender,
    ) -> Result<SessionRecord, RoomError> {
        self.detach(connection_id).await;

        for attempt in 1..=ATTACH_ATTEMPTS {
            // A new room subscribes before the record is read, so every
            // commit after that read is on its feed.
            let events = if self.has_room(session_id).await {
                None
            } else {
                Some(self.subscribe(session_id).await?)
            };

            let record = self.sessions.fetch(session_id, player).await?;
            let role = record.role_of(player).ok_or_else(|| {
                MatchError::Unauthorized {
                    session_id: session_id.clone(),
                    player,
                }
            })?;

            let mut table = self.table.lock().await;
            let existing = table.rooms.get(session_id).cloned();
            let handle = match (existing, events) {
                (Some(handle), _) => handle,
                (None, Some(events)) => {
                    tracing::debug!(%session_id, version = record.version, "room created");
                    let handle = spawn_room(
                        session_id.clone(),
                        &self.config,
                        record.version,
                        events,
                    );
                    table.rooms.insert(session_id.clone(), handle.clone());
                    handle
                }
                // The room closed after we looked; start over with a
                // fresh subscription.
                (None, None) => continue,
            };

            let attachment = Attachment {
                connection_id,
                player,
                role,
                record: record.clone(),
                sender: sender.clone(),
            };
            match handle.attach(attachment).await {
                Ok(Ok(())) => {
                    table
                        .connections
                        .insert(connection_id, session_id.clone());
                    return Ok(record);
                }
                Ok(Err(delivered)) => {
                    tracing::debug!(
                        %session_id,
                        conn_id = %connection_id,
                        attempt,
                        read = record.version,
                        delivered,
                        "room is ahead of the record read, retrying"
                    );
                }
                Err(err) => {
                    // The actor is gone; forget it so the next attempt
                    // starts a fresh room.
                    tracing::warn!(%session_id, error = %err, "dropping dead room");
                    table.rooms.remove(session_id);
                }
            }
        }

        Err(RoomError::Unavailable(session_id.clone()))
    }

    /// Publishes `broadcast` to every room of `session_id`, in this
    /// process or any other sharing the store.
    ///
    /// If the bus cannot take it, the broadcast still goes to this
    /// process's room. Sessions nobody is attached to are silently
    /// skipped.
    pub async fn broadcast(&self, session_id: &SessionId, broadcast: Broadcast) {
        let published = match serde_json::to_vec(&broadcast) {
            Ok(payload) => self
                .sessions
                .store()
                .publish(&events_topic(session_id), payload)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = published {
            tracing::warn!(%session_id, %error, "publish failed, delivering locally");
            self.deliver_local(session_id, broadcast).await;
        }
    }

    async fn deliver_local(&self, session_id: &SessionId, broadcast: Broadcast) {
        let handle = {
            let table = self.table.lock().await;
            table.rooms.get(session_id).cloned()
        };
        let Some(handle) = handle else {
            tracing::debug!(%session_id, "no local room for broadcast");
            return;
        };
        if let Err(err) = handle.broadcast(broadcast).await {
            tracing::warn!(%session_id, error = %err, "broadcast failed");
        }
    }

    async fn has_room(&self, session_id: &SessionId) -> bool {
        self.table.lock().await.rooms.contains_key(session_id)
    }

    async fn subscribe(
        &self,
        session_id: &SessionId,
    ) -> Result<Subscription, RoomError> {
        self.sessions
            .store()
            .subscribe(&events_topic(session_id))
            .await
            .map_err(|source| RoomError::Events {
                session_id: session_id.clone(),
                source,
            })
    }

    /// Unbinds `connection_id` from whatever session it is attached to
    /// and returns that session.
    ///
    /// Never touches session state and never broadcasts: a player going
    /// away is not a move. A room left with no members is shut down.
    pub async fn detach(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let mut table = self.table.lock().await;
        let session_id = table.connections.remove(&connection_id)?;

        let Some(handle) = table.rooms.get(&session_id).cloned() else {
            return Some(session_id);
        };
        let empty = match handle.detach(connection_id).await {
            Ok(()) => handle.members().await.map(|m| m.is_empty()).unwrap_or(true),
            Err(_) => true,
        };
        if empty {
            table.rooms.remove(&session_id);
            let _ = handle.shutdown().await;
            tracing::debug!(%session_id, "room closed");
        }

        Some(session_id)
    }

    /// The connections currently attached to `session_id`, with the
    /// player each one acts for.
    pub async fn members(
        &self,
        session_id: &SessionId,
    ) -> Vec<(ConnectionId, PlayerId)> {
        let handle = {
            let table = self.table.lock().await;
            table.rooms.get(session_id).cloned()
        };
        match handle {
            Some(handle) => handle.members().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// The session `connection_id` is attached to, if any.
    pub async fn bound_session(
        &self,
        connection_id: ConnectionId,
    ) -> Option<SessionId> {
        self.table
            .lock()
            .await
            .connections
            .get(&connection_id)
            .cloned()
    }

    /// Number of rooms with live actors.
    pub async fn room_count(&self) -> usize {
        self.table.lock().await.rooms.len()
    }
}
