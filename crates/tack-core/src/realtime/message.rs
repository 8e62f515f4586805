//! Board events as routed through rooms.

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tack_protocol::{codec, BroadcastPayload, EventName, Frame, ProtocolError};

use super::ConnectionId;
use crate::ids::{BoardId, UserId};

/// Process-wide event sequence number.
pub type EventId = u64;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> EventId {
    EVENT_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Who published an event; decides which channels must not get it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A mutation made by this user; none of the user's channels receive it.
    Actor(UserId),
    /// Client-originated ephemeral event; only this channel is skipped.
    Connection(ConnectionId),
    /// Nobody is skipped.
    Server,
}

/// An event published to a board room.
#[derive(Debug, Clone)]
pub struct BoardEvent {
    pub id: EventId,
    pub board: BoardId,
    pub event: EventName,
    pub payload: Value,
    pub origin: Origin,
    /// Pre-encoded `event` frame shared by every recipient.
    pub frame: Bytes,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl BoardEvent {
    /// Build an event and encode its frame once.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded.
    pub fn new(
        board: BoardId,
        event: EventName,
        payload: &BroadcastPayload,
        origin: Origin,
    ) -> Result<Self, ProtocolError> {
        let frame = codec::encode_event(&board.to_string(), event, payload)?;
        Ok(Self::with_frame(board, event, payload.to_value(), origin, frame))
    }

    /// Build a room notice whose payload is not entity-shaped, such as
    /// `participant:left`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be encoded.
    pub fn notice(
        board: BoardId,
        event: EventName,
        payload: Value,
        origin: Origin,
    ) -> Result<Self, ProtocolError> {
        let frame = codec::encode(&Frame::event(board.to_string(), event, payload.clone()))?;
        Ok(Self::with_frame(board, event, payload, origin, frame))
    }

    fn with_frame(board: BoardId, event: EventName, payload: Value, origin: Origin, frame: Bytes) -> Self {
        Self {
            id: next_event_id(),
            board,
            event,
            payload,
            origin,
            frame,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Whether delivering to this channel would echo the event back to its publisher.
    #[must_use]
    pub fn is_echo_for(&self, connection: &ConnectionId, user: UserId) -> bool {
        match &self.origin {
            Origin::Actor(actor) => *actor == user,
            Origin::Connection(source) => source == connection,
            Origin::Server => false,
        }
    }
}
