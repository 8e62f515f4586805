//! A board's broadcast room.
//!
//! One broadcast queue per room keeps per-board delivery in publish order.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use super::message::BoardEvent;
use super::ConnectionId;
use crate::ids::{BoardId, UserId};

/// Default broadcast queue capacity.
pub const DEFAULT_ROOM_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Member {
    user: UserId,
    /// Dropped when the channel leaves, closing its [`Membership::active`].
    _active: watch::Sender<()>,
}

/// Receiving half of one channel's place in a room.
#[derive(Debug)]
pub struct Membership {
    pub events: broadcast::Receiver<Arc<BoardEvent>>,
    /// Closes once the channel is no longer in the room.
    pub active: watch::Receiver<()>,
}

impl Membership {
    /// `false` once the channel has left or the room is gone.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.has_changed().is_ok()
    }
}

#[derive(Debug)]
pub struct Room {
    board: BoardId,
    sender: broadcast::Sender<Arc<BoardEvent>>,
    members: HashMap<ConnectionId, Member>,
}

impl Room {
    #[must_use]
    pub fn new(board: BoardId) -> Self {
        Self::with_capacity(board, DEFAULT_ROOM_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(board: BoardId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            board,
            sender,
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn board(&self) -> BoardId {
        self.board
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.members.contains_key(connection)
    }

    /// Add a channel and hand back its receiving half.
    ///
    /// Re-subscribing a connection closes its previous membership.
    pub fn subscribe(&mut self, connection: ConnectionId, user: UserId) -> Membership {
        debug!(board = %self.board, connection = %connection, "Channel joined room");
        let (active_tx, active_rx) = watch::channel(());
        self.members.insert(
            connection,
            Member {
                user,
                _active: active_tx,
            },
        );
        Membership {
            events: self.sender.subscribe(),
            active: active_rx,
        }
    }

    /// Returns `true` if the channel was in the room.
    pub fn unsubscribe(&mut self, connection: &ConnectionId) -> bool {
        let removed = self.members.remove(connection).is_some();
        if removed {
            debug!(board = %self.board, connection = %connection, "Channel left room");
        }
        removed
    }

    /// Queue an event for every participant.
    ///
    /// Returns the number of participants the event is meant for, i.e.
    /// excluding the publisher's own channels.
    pub fn publish(&self, event: Arc<BoardEvent>) -> usize {
        let recipients = self
            .members
            .iter()
            .filter(|(conn, member)| !event.is_echo_for(conn, member.user))
            .count();
        if recipients == 0 {
            return 0;
        }
        trace!(board = %self.board, event = %event.event, recipients, "Publishing to room");
        // A send error only means every receiver is gone.
        let _ = self.sender.send(event);
        recipients
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
