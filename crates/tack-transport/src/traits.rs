//! Transport traits and error types.

use async_trait::async_trait;
use bytes::Bytes;
use tack_protocol::{Frame, ProtocolError};
use thiserror::Error;

pub use tack_core::ConnectionId;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,

    /// The presented identity token was rejected.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Wire error code used in `error` frames.
    #[must_use]
    pub fn error_code(&self) -> u16 {
        match self {
            TransportError::Unauthenticated(_) => 1401,
            TransportError::MessageTooLarge { .. } => 1413,
            TransportError::Protocol(_) => 1001,
            _ => 1500,
        }
    }
}

/// The write half of a client channel.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> &ConnectionId;

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Send a pre-encoded frame, e.g. a shared broadcast frame.
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// The read half of a client channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Next decoded frame. `None` once the peer has closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}
