//! Room actor: an isolated Tokio task that owns one session's broadcast
//! group.
//!
//! Each room runs in its own task and talks to the outside world through
//! an mpsc channel, so delivery order inside a room is simply the order
//! in which the actor processes its commands. On top of that the actor
//! keeps a small reorder buffer keyed by record version: two moves
//! committed back to back, possibly by different server processes, may
//! have their broadcasts published in the opposite order, and players
//! must still see them in commit order.
//!
//! Broadcasts reach the actor through the session's event-bus
//! subscription, so a room sees every commit no matter which process
//! made it.

use std::collections::BTreeMap;
use std::time::Duration;

use gambit_protocol::{PlayerId, Role, ServerEvent, SessionId, SessionRecord};
use gambit_store::Subscription;
use gambit_transport::ConnectionId;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{RoomConfig, RoomError};

/// Channel delivering events to one connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

/// Something to deliver to every member of a room.
///
/// Serialized as-is onto the session's event topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Broadcast {
    /// The result of the mutation that produced `version`. Delivered in
    /// strict version order, and never to a member whose initial sync
    /// already included it.
    Ordered { version: u64, event: ServerEvent },

    /// Not tied to a record version; delivered as soon as it arrives.
    Notice(ServerEvent),
}

/// Who is attaching, as established by the coordinator.
pub(crate) struct Attachment {
    pub connection_id: ConnectionId,
    pub player: PlayerId,
    pub role: Role,
    pub record: SessionRecord,
    pub sender: ConnectionSender,
}

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    /// Add a connection. Replies `Err(delivered)` without adding it if
    /// `record` is older than what the room has already delivered.
    Attach {
        attachment: Attachment,
        reply: oneshot::Sender<Result<(), u64>>,
    },

    Detach {
        connection_id: ConnectionId,
        reply: oneshot::Sender<()>,
    },

    Broadcast(Broadcast),

    Members {
        reply: oneshot::Sender<Vec<(ConnectionId, PlayerId)>>,
    },

    Shutdown,
}

/// Handle to a running room actor.
///
/// Cheap to clone; it is just an `mpsc::Sender` wrapper.
#[derive(Clone)]
pub(crate) struct RoomHandle {
    session_id: SessionId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Unavailable(self.session_id.clone()))
    }

    pub async fn attach(
        &self,
        attachment: Attachment,
    ) -> Result<Result<(), u64>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Attach {
            attachment,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.session_id.clone()))
    }

    pub async fn detach(
        &self,
        connection_id: ConnectionId,
    ) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Detach {
            connection_id,
            reply: reply_tx,
        })
        .await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.session_id.clone()))
    }

    pub async fn broadcast(&self, broadcast: Broadcast) -> Result<(), RoomError> {
        self.send(RoomCommand::Broadcast(broadcast)).await
    }

    pub async fn members(
        &self,
    ) -> Result<Vec<(ConnectionId, PlayerId)>, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(RoomCommand::Members { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.session_id.clone()))
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }
}

struct Member {
    player: PlayerId,
    sender: ConnectionSender,
    /// Version of the record this member was synced with.
    synced: u64,
}

struct Pending {
    event: ServerEvent,
    arrived: Instant,
}

/// The internal room actor state. Runs inside a Tokio task.
struct RoomActor {
    session_id: SessionId,
    members: BTreeMap<ConnectionId, Member>,
    /// Highest version handed to members so far.
    delivered: u64,
    /// Ordered broadcasts waiting for an earlier version.
    pending: BTreeMap<u64, Pending>,
    reorder_window: Duration,
    receiver: mpsc::Receiver<RoomCommand>,
    /// Broadcasts published by any process. `None` once the bus has
    /// stopped feeding it.
    events: Option<Subscription>,
}

impl RoomActor {
    /// Runs the actor loop, processing commands until shutdown.
    async fn run(mut self) {
        tracing::debug!(session_id = %self.session_id, "room actor started");

        loop {
            let deadline = self.gap_deadline();
            tokio::select! {
                // Published broadcasts first: a command queued behind one
                // (a detach, a members query) sees its effect.
                biased;

                published = next_published(&mut self.events) => {
                    match published {
                        Some(payload) => self.handle_published(&payload, Instant::now()),
                        None => {
                            tracing::warn!(
                                session_id = %self.session_id,
                                "event subscription ended"
                            );
                            self.events = None;
                        }
                    }
                }
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle(cmd) {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.skip_expired_gaps(Instant::now());
                }
            }
        }

        tracing::debug!(session_id = %self.session_id, "room actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Attach { attachment, reply } => {
                let _ = reply.send(self.handle_attach(attachment));
            }
            RoomCommand::Detach {
                connection_id,
                reply,
            } => {
                self.handle_detach(connection_id);
                let _ = reply.send(());
            }
            RoomCommand::Broadcast(broadcast) => {
                self.deliver(broadcast, Instant::now());
            }
            RoomCommand::Members { reply } => {
                let members = self
                    .members
                    .iter()
                    .map(|(id, m)| (*id, m.player))
                    .collect();
                let _ = reply.send(members);
            }
            RoomCommand::Shutdown => {
                tracing::debug!(session_id = %self.session_id, "room shutting down");
                return false;
            }
        }
        true
    }

    fn handle_attach(&mut self, attachment: Attachment) -> Result<(), u64> {
        let Attachment {
            connection_id,
            player,
            role,
            record,
            sender,
        } = attachment;

        if record.version < self.delivered {
            return Err(self.delivered);
        }

        let synced = record.version;
        let _ = sender.send(ServerEvent::Synced { record });
        self.members.insert(
            connection_id,
            Member {
                player,
                sender,
                synced,
            },
        );
        tracing::info!(
            session_id = %self.session_id,
            conn_id = %connection_id,
            %player,
            version = synced,
            members = self.members.len(),
            "connection attached"
        );

        let peer = ServerEvent::PeerAttached {
            session_id: self.session_id.clone(),
            player,
            role,
            color: role.color(),
        };
        self.send_all(&peer, Some(connection_id), 0);
        Ok(())
    }

    fn handle_detach(&mut self, connection_id: ConnectionId) {
        if let Some(member) = self.members.remove(&connection_id) {
            tracing::info!(
                session_id = %self.session_id,
                conn_id = %connection_id,
                player = %member.player,
                members = self.members.len(),
                "connection detached"
            );
        }
    }

    fn handle_published(&mut self, payload: &[u8], now: Instant) {
        match serde_json::from_slice::<Broadcast>(payload) {
            Ok(broadcast) => self.deliver(broadcast, now),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "undecodable broadcast on event topic"
                );
            }
        }
    }

    fn deliver(&mut self, broadcast: Broadcast, now: Instant) {
        match broadcast {
            Broadcast::Ordered { version, event } => {
                self.handle_ordered(version, event, now);
            }
            Broadcast::Notice(event) => self.send_all(&event, None, 0),
        }
    }

    fn handle_ordered(&mut self, version: u64, event: ServerEvent, now: Instant) {
        if version <= self.delivered || self.pending.contains_key(&version) {
            tracing::debug!(
                session_id = %self.session_id,
                version,
                delivered = self.delivered,
                "dropping stale broadcast"
            );
            return;
        }
        self.pending.insert(version, Pending { event, arrived: now });
        self.drain_in_order();
    }

    /// Delivers pending broadcasts for as long as the next one in line
    /// is the very next version.
    fn drain_in_order(&mut self) {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.delivered + 1 {
                break;
            }
            let (version, pending) = entry.remove_entry();
            self.send_all(&pending.event, None, version);
            self.delivered = version;
        }
    }

    /// When the oldest buffered broadcast has waited out the reorder
    /// window, stop waiting for the versions before it.
    fn skip_expired_gaps(&mut self, now: Instant) {
        while let Some((&version, pending)) = self.pending.first_key_value() {
            if now.duration_since(pending.arrived) < self.reorder_window {
                break;
            }
            tracing::warn!(
                session_id = %self.session_id,
                from = self.delivered + 1,
                to = version - 1,
                "skipping version gap"
            );
            self.delivered = version - 1;
            self.drain_in_order();
        }
    }

    fn gap_deadline(&self) -> Option<Instant> {
        self.pending
            .first_key_value()
            .map(|(_, pending)| pending.arrived + self.reorder_window)
    }

    /// Sends `event` to every member except `skip` whose sync point is
    /// older than `version`. A `version` of 0 reaches everyone.
    fn send_all(
        &self,
        event: &ServerEvent,
        skip: Option<ConnectionId>,
        version: u64,
    ) {
        for (id, member) in &self.members {
            if Some(*id) == skip || (version > 0 && version <= member.synced) {
                continue;
            }
            // A closed receiver means the connection is going away; its
            // handler will detach it.
            let _ = member.sender.send(event.clone());
        }
    }
}

async fn next_published(events: &mut Option<Subscription>) -> Option<Vec<u8>> {
    match events {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Spawns a new room actor task and returns a handle to it.
///
/// `initial_version` is the record version the room starts from; only
/// ordered broadcasts above it are delivered. `events` must have been
/// subscribed before the record at `initial_version` was read.
pub(crate) fn spawn_room(
    session_id: SessionId,
    config: &RoomConfig,
    initial_version: u64,
    events: Subscription,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.channel_size);

    let actor = RoomActor {
        session_id: session_id.clone(),
        members: BTreeMap::new(),
        delivered: initial_version,
        pending: BTreeMap::new(),
        reorder_window: config.reorder_window,
        receiver: rx,
        events: Some(events),
    };
    tokio::spawn(actor.run());

    RoomHandle {
        session_id,
        sender: tx,
    }
}
