//! The realtime hub: an explicit registry of board rooms and the
//! authenticated channels joined to them.

use dashmap::DashMap;
use serde_json::json;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tack_protocol::{BroadcastPayload, EventName, ParticipantInfo};
use thiserror::Error;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use super::message::{BoardEvent, Origin};
use super::presence::Presence;
use super::room::{Membership, Room, DEFAULT_ROOM_CAPACITY};
use super::{ConnectionId, Identity};
use crate::error::CoreError;
use crate::ids::{BoardId, UserId};
use crate::role::{Role, RoleResolver};

/// Hub registry errors.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Connection is not authenticated: {0}")]
    Unauthenticated(ConnectionId),

    #[error("Connection already registered: {0}")]
    AlreadyConnected(ConnectionId),

    #[error("Already joined board: {0}")]
    AlreadyJoined(BoardId),

    #[error("Not joined to board: {0}")]
    NotJoined(BoardId),

    #[error("Maximum rooms per connection reached")]
    MaxRoomsReached,

    /// The join policy rejected the channel.
    #[error(transparent)]
    Access(#[from] CoreError),
}

impl HubError {
    #[must_use]
    pub fn error_code(&self) -> u16 {
        match self {
            HubError::Unauthenticated(_) => 1401,
            HubError::AlreadyConnected(_) => 1409,
            HubError::AlreadyJoined(_) => 1002,
            HubError::NotJoined(_) => 1008,
            HubError::MaxRoomsReached => 1429,
            HubError::Access(e) => e.error_code(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Broadcast queue capacity per room.
    pub room_capacity: usize,
    pub max_rooms_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            room_capacity: DEFAULT_ROOM_CAPACITY,
            max_rooms_per_connection: 100,
        }
    }
}

struct RoomEntry {
    room: Room,
    presence: Presence,
}

impl RoomEntry {
    fn new(board: BoardId, capacity: usize) -> Self {
        Self {
            room: Room::with_capacity(board, capacity),
            presence: Presence::new(),
        }
    }
}

struct ConnectionEntry {
    identity: Identity,
    rooms: HashSet<BoardId>,
}

/// A channel's view of one board room.
///
/// Events published by the channel's own user (or, for client-originated
/// events, by the channel itself) are skipped. The stream ends once the
/// channel leaves the room or disconnects.
pub struct Subscription {
    board: BoardId,
    connection: ConnectionId,
    user: UserId,
    membership: Membership,
}

impl Subscription {
    #[must_use]
    pub fn board(&self) -> BoardId {
        self.board
    }

    /// `false` once the channel has left the room.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.membership.is_active()
    }

    /// Next event meant for this channel. `None` once the channel has left.
    pub async fn recv(&mut self) -> Option<Arc<BoardEvent>> {
        loop {
            let Membership { events, active } = &mut self.membership;
            let result = tokio::select! {
                biased;
                _ = active.changed() => return None,
                result = events.recv() => result,
            };
            match result {
                Ok(event) if event.is_echo_for(&self.connection, self.user) => continue,
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(board = %self.board, connection = %self.connection, skipped, "Channel lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<Arc<BoardEvent>> {
        if !self.membership.is_active() {
            return None;
        }
        loop {
            match self.membership.events.try_recv() {
                Ok(event) if event.is_echo_for(&self.connection, self.user) => continue,
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(board = %self.board, connection = %self.connection, skipped, "Channel lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Registry of board rooms, constructed once at process start.
pub struct RealtimeHub {
    rooms: DashMap<BoardId, RoomEntry>,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    join_policy: Option<RoleResolver>,
    config: HubConfig,
}

impl RealtimeHub {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating realtime hub with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            join_policy: None,
            config,
        }
    }

    /// Require at least viewer access to a board before a channel may join it.
    #[must_use]
    pub fn with_join_policy(mut self, resolver: RoleResolver) -> Self {
        self.join_policy = Some(resolver);
        self
    }

    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            room_count: self.rooms.len(),
            connection_count: self.connections.len(),
            total_joins: self.connections.iter().map(|c| c.rooms.len()).sum(),
        }
    }

    /// Register an authenticated channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection id is already registered.
    pub fn connect(&self, connection: ConnectionId, identity: Identity) -> Result<(), HubError> {
        if self.connections.contains_key(&connection) {
            return Err(HubError::AlreadyConnected(connection));
        }
        debug!(connection = %connection, user = %identity.user_id, "Channel connected");
        self.connections.insert(
            connection,
            ConnectionEntry {
                identity,
                rooms: HashSet::new(),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn identity(&self, connection: &ConnectionId) -> Option<Identity> {
        self.connections.get(connection).map(|c| c.identity.clone())
    }

    #[must_use]
    pub fn is_connected(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Join a board room, creating it on demand.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is unauthenticated, already joined,
    /// at its room limit, or rejected by the join policy.
    pub async fn join(&self, connection: &ConnectionId, board: BoardId) -> Result<Subscription, HubError> {
        let identity = {
            let entry = self
                .connections
                .get(connection)
                .ok_or_else(|| HubError::Unauthenticated(connection.clone()))?;
            if entry.rooms.contains(&board) {
                return Err(HubError::AlreadyJoined(board));
            }
            if entry.rooms.len() >= self.config.max_rooms_per_connection {
                return Err(HubError::MaxRoomsReached);
            }
            entry.identity.clone()
        };

        if let Some(resolver) = &self.join_policy {
            resolver
                .board_access(board, identity.user_id)
                .await?
                .require(Role::Viewer)?;
        }

        let membership = {
            let mut entry = self.rooms.entry(board).or_insert_with(|| {
                debug!(board = %board, "Creating room");
                RoomEntry::new(board, self.config.room_capacity)
            });
            entry.presence.join(connection.clone(), identity.clone());
            entry.room.subscribe(connection.clone(), identity.user_id)
        };

        let registered = match self.connections.get_mut(connection) {
            Some(mut entry) => entry.rooms.insert(board),
            None => false,
        };
        if !registered {
            // Disconnected while joining.
            self.detach(connection, board);
            return Err(HubError::Unauthenticated(connection.clone()));
        }

        debug!(board = %board, connection = %connection, "Joined board");
        Ok(Subscription {
            board,
            connection: connection.clone(),
            user: identity.user_id,
            membership,
        })
    }

    /// Leave a board room; an emptied room is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is not in the room.
    pub fn leave(&self, connection: &ConnectionId, board: BoardId) -> Result<(), HubError> {
        let removed = self
            .connections
            .get_mut(connection)
            .map(|mut c| c.rooms.remove(&board))
            .unwrap_or(false);
        if !removed {
            return Err(HubError::NotJoined(board));
        }
        self.detach(connection, board);
        debug!(board = %board, connection = %connection, "Left board");
        Ok(())
    }

    /// Drop a channel from every room and tell the rest of each room.
    ///
    /// Returns the number of rooms the channel was in.
    pub fn disconnect(&self, connection: &ConnectionId) -> usize {
        let Some((_, entry)) = self.connections.remove(connection) else {
            return 0;
        };

        for board in &entry.rooms {
            if self.detach(connection, *board) {
                continue;
            }
            let notice = json!({
                "userId": entry.identity.user_id.to_string(),
                "connectionId": connection.to_string(),
            });
            match BoardEvent::notice(
                *board,
                EventName::ParticipantLeft,
                notice,
                Origin::Connection(connection.clone()),
            ) {
                Ok(event) => {
                    self.deliver(event);
                }
                Err(e) => warn!(board = %board, error = %e, "Failed to encode participant notice"),
            }
        }

        debug!(connection = %connection, rooms = entry.rooms.len(), "Channel disconnected");
        entry.rooms.len()
    }

    /// Publish a mutation event to every other channel of a board.
    ///
    /// Channels belonging to the actor named in the payload are skipped.
    /// Returns the number of channels the event was queued for; a missing
    /// room is a no-op.
    pub fn publish(&self, board: BoardId, event: EventName, payload: &BroadcastPayload) -> usize {
        let origin = match UserId::parse(&payload.actor.id) {
            Ok(actor) => Origin::Actor(actor),
            Err(_) => Origin::Server,
        };
        self.publish_with_origin(board, event, payload, origin)
    }

    /// Publish a client-originated event, skipping only the originating channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel has not joined the board.
    pub fn publish_from(
        &self,
        connection: &ConnectionId,
        board: BoardId,
        event: EventName,
        payload: &BroadcastPayload,
    ) -> Result<usize, HubError> {
        let joined = self
            .connections
            .get(connection)
            .map(|c| c.rooms.contains(&board))
            .unwrap_or(false);
        if !joined {
            return Err(HubError::NotJoined(board));
        }
        Ok(self.publish_with_origin(board, event, payload, Origin::Connection(connection.clone())))
    }

    fn publish_with_origin(
        &self,
        board: BoardId,
        event: EventName,
        payload: &BroadcastPayload,
        origin: Origin,
    ) -> usize {
        if !self.rooms.contains_key(&board) {
            return 0;
        }
        match BoardEvent::new(board, event, payload, origin) {
            Ok(event) => self.deliver(event),
            Err(e) => {
                warn!(board = %board, event = %event, error = %e, "Failed to encode broadcast");
                0
            }
        }
    }

    fn deliver(&self, event: BoardEvent) -> usize {
        self.rooms
            .get(&event.board)
            .map(|entry| entry.room.publish(Arc::new(event)))
            .unwrap_or(0)
    }

    /// Remove a channel from a room. Returns `true` if the room was
    /// emptied and deleted.
    fn detach(&self, connection: &ConnectionId, board: BoardId) -> bool {
        if let Some(mut entry) = self.rooms.get_mut(&board) {
            entry.room.unsubscribe(connection);
            entry.presence.leave(connection);
        }
        let removed = self
            .rooms
            .remove_if(&board, |_, entry| entry.room.is_empty())
            .is_some();
        if removed {
            debug!(board = %board, "Deleted empty room");
        }
        removed
    }

    /// Who has a board open, earliest joiner first.
    #[must_use]
    pub fn participants(&self, board: BoardId) -> Vec<ParticipantInfo> {
        self.rooms
            .get(&board)
            .map(|e| e.presence.snapshot())
            .unwrap_or_default()
    }

    /// Refresh a channel's presence in every room it has joined.
    pub fn touch(&self, connection: &ConnectionId) {
        let boards: Vec<BoardId> = self
            .connections
            .get(connection)
            .map(|c| c.rooms.iter().copied().collect())
            .unwrap_or_default();
        for board in boards {
            if let Some(mut entry) = self.rooms.get_mut(&board) {
                entry.presence.touch(connection);
            }
        }
    }

    /// Disconnect every joined channel silent for longer than `timeout`,
    /// telling the rest of each room. Returns the pruned connections.
    pub fn prune_stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Vec::new();
        };
        let now = Utc::now();
        let stale: HashSet<ConnectionId> = self
            .rooms
            .iter()
            .flat_map(|entry| entry.presence.stale(timeout, now))
            .collect();
        for connection in &stale {
            info!(connection = %connection, "Pruning stale channel");
            self.disconnect(connection);
        }
        stale.into_iter().collect()
    }

    #[must_use]
    pub fn room_exists(&self, board: BoardId) -> bool {
        self.rooms.contains_key(&board)
    }

    #[must_use]
    pub fn participant_count(&self, board: BoardId) -> usize {
        self.rooms
            .get(&board)
            .map(|e| e.room.participant_count())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn connection_rooms(&self, connection: &ConnectionId) -> Vec<BoardId> {
        self.connections
            .get(connection)
            .map(|c| c.rooms.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HubStats {
    pub room_count: usize,
    pub connection_count: usize,
    pub total_joins: usize,
}
