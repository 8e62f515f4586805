//! Frame types for the Tack realtime protocol.
//!
//! Frames are exchanged between board clients and the server over a
//! WebSocket. Each frame is serialized using MessagePack.

use serde::{Deserialize, Serialize};

use crate::events::EventName;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Join = 0x01,
    Leave = 0x02,
    Event = 0x03,
    Presence = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
    Connect = 0x09,
    Connected = 0x0A,
    Typing = 0x0B,
    Cursor = 0x0C,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Join),
            0x02 => Ok(FrameType::Leave),
            0x03 => Ok(FrameType::Event),
            0x04 => Ok(FrameType::Presence),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            0x09 => Ok(FrameType::Connect),
            0x0A => Ok(FrameType::Connected),
            0x0B => Ok(FrameType::Typing),
            0x0C => Ok(FrameType::Cursor),
            _ => Err("Invalid frame type"),
        }
    }
}

/// One participant in a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub connection_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub joined_at: u64,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Open a board's room.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Board id.
        board: String,
    },

    /// Close a board's room.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Board id.
        board: String,
    },

    /// A broadcast delivered to a room participant.
    #[serde(rename = "event")]
    Event {
        board: String,
        event: EventName,
        /// Payload in the `{entityKey, action?, actorKey}` shape.
        payload: serde_json::Value,
    },

    /// Presence snapshot for a room, sent after a successful join.
    #[serde(rename = "presence")]
    Presence {
        board: String,
        participants: Vec<ParticipantInfo>,
    },

    /// Client is (or stopped) typing on a card.
    #[serde(rename = "typing")]
    Typing {
        board: String,
        card: String,
        typing: bool,
    },

    /// Client cursor position on a board.
    #[serde(rename = "cursor")]
    Cursor { board: String, x: f64, y: f64 },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Initial connection handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
        /// Identity token, unless already given as a query parameter.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        connection_id: String,
        /// Verified user id the channel is keyed to.
        user_id: String,
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Event { .. } => FrameType::Event,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::Typing { .. } => FrameType::Typing,
            Frame::Cursor { .. } => FrameType::Cursor,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    #[must_use]
    pub fn join(id: u64, board: impl Into<String>) -> Self {
        Frame::Join {
            id,
            board: board.into(),
        }
    }

    #[must_use]
    pub fn leave(id: u64, board: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            board: board.into(),
        }
    }

    #[must_use]
    pub fn event(board: impl Into<String>, event: EventName, payload: serde_json::Value) -> Self {
        Frame::Event {
            board: board.into(),
            event,
            payload,
        }
    }

    #[must_use]
    pub fn presence(board: impl Into<String>, participants: Vec<ParticipantInfo>) -> Self {
        Frame::Presence {
            board: board.into(),
            participants,
        }
    }

    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        version: u8,
        heartbeat: u32,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            version,
            heartbeat,
        }
    }

    /// The board a frame addresses, if any.
    #[must_use]
    pub fn board(&self) -> Option<&str> {
        match self {
            Frame::Join { board, .. }
            | Frame::Leave { board, .. }
            | Frame::Event { board, .. }
            | Frame::Presence { board, .. }
            | Frame::Typing { board, .. }
            | Frame::Cursor { board, .. } => Some(board),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        assert_eq!(Frame::join(1, "b1").frame_type(), FrameType::Join);
        assert_eq!(Frame::ack(3).frame_type(), FrameType::Ack);
        assert_eq!(
            Frame::event("b1", EventName::CardMoved, serde_json::json!({})).frame_type(),
            FrameType::Event
        );
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x01), Ok(FrameType::Join));
        assert_eq!(FrameType::try_from(0x0C), Ok(FrameType::Cursor));
        assert!(FrameType::try_from(0x42).is_err());
        assert_eq!(u8::from(FrameType::Typing), 0x0B);
    }

    #[test]
    fn test_frame_board() {
        assert_eq!(Frame::leave(1, "b9").board(), Some("b9"));
        assert_eq!(Frame::ping().board(), None);
    }

    #[test]
    fn test_frame_json_tag() {
        let json = serde_json::to_value(Frame::join(7, "b1")).unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["id"], 7);
    }
}
