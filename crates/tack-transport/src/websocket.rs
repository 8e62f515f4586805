//! WebSocket channels over axum.
//!
//! A socket is split into a [`WebSocketConnection`] (write half) and
//! [`WebSocketFrames`] (read half) so a server loop can wait on inbound
//! frames and outbound broadcasts at the same time.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tack_protocol::{codec, Frame};
use tracing::{debug, warn};

use crate::traits::{Connection, ConnectionId, FrameSource, TransportError};

/// Default maximum size of a single WebSocket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Reassembles length-prefixed frames from WebSocket message payloads.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_message_size: usize,
}

impl FrameBuffer {
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_message_size,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the chunk exceeds the message size limit.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), TransportError> {
        if chunk.len() > self.max_message_size {
            warn!(size = chunk.len(), max = self.max_message_size, "Message too large");
            return Err(TransportError::MessageTooLarge {
                size: chunk.len(),
                max: self.max_message_size,
            });
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffered bytes are not a valid frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        Ok(codec::decode_from_limited(&mut self.buf, self.max_message_size)?)
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Split an upgraded socket into its write and read halves.
#[must_use]
pub fn split_socket(
    socket: WebSocket,
    id: ConnectionId,
    max_message_size: usize,
) -> (WebSocketConnection, WebSocketFrames) {
    let (sink, stream) = socket.split();
    (
        WebSocketConnection {
            id: id.clone(),
            sink,
            open: true,
        },
        WebSocketFrames {
            id,
            stream,
            buffer: FrameBuffer::new(max_message_size),
        },
    )
}

/// Write half of a WebSocket channel.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    open: bool,
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = codec::encode(frame)?;
        self.send_raw(data).await
    }

    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| {
                self.open = false;
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("failed to close: {e}")))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Read half of a WebSocket channel.
pub struct WebSocketFrames {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    buffer: FrameBuffer,
}

#[async_trait]
impl FrameSource for WebSocketFrames {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.buffer.push(&data)?,
                // Text is accepted for clients that cannot send binary.
                Some(Ok(Message::Text(text))) => self.buffer.push(text.as_bytes())?,
                // Pongs are queued by the socket itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_split_across_messages() {
        let mut buffer = FrameBuffer::new(DEFAULT_MAX_MESSAGE_SIZE);
        let encoded = codec::encode(&Frame::join(7, "board-1")).unwrap();
        let (head, tail) = encoded.split_at(3);

        buffer.push(head).unwrap();
        assert!(buffer.next_frame().unwrap().is_none());
        buffer.push(tail).unwrap();
        assert_eq!(buffer.next_frame().unwrap(), Some(Frame::join(7, "board-1")));
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn test_two_frames_in_one_message() {
        let mut buffer = FrameBuffer::new(DEFAULT_MAX_MESSAGE_SIZE);
        let mut data = codec::encode(&Frame::ping()).unwrap().to_vec();
        data.extend_from_slice(&codec::encode(&Frame::leave(2, "board-1")).unwrap());

        buffer.push(&data).unwrap();
        assert!(matches!(buffer.next_frame().unwrap(), Some(Frame::Ping { .. })));
        assert_eq!(buffer.next_frame().unwrap(), Some(Frame::leave(2, "board-1")));
        assert!(buffer.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut buffer = FrameBuffer::new(8);
        let err = buffer.push(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { size: 9, max: 8 }));
        assert_eq!(err.error_code(), 1413);
    }

    #[test]
    fn test_declared_length_over_limit_rejected() {
        let mut buffer = FrameBuffer::new(16);
        buffer.push(&[0, 0, 1, 0]).unwrap();
        assert!(matches!(buffer.next_frame(), Err(TransportError::Protocol(_))));
    }
}
