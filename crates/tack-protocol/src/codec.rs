//! Codec for encoding and decoding Tack frames.
//!
//! Frames are MessagePack maps behind a 4-byte big-endian length prefix.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::events::{BroadcastPayload, EventName};
use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid frame or payload data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(())
}

/// Encode a board broadcast once so every room participant shares the bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_event(
    board: &str,
    event: EventName,
    payload: &BroadcastPayload,
) -> Result<Bytes, ProtocolError> {
    encode(&Frame::event(board, event, payload.to_value()))
}

fn frame_length(data: &[u8], limit: usize) -> Result<Option<usize>, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > limit {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(Some(length))
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let length = frame_length(data, MAX_FRAME_SIZE)?
        .ok_or_else(|| ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()))?;

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(None)` if more data is needed.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    decode_from_limited(buf, MAX_FRAME_SIZE)
}

/// Like [`decode_from`], with a caller-chosen frame size limit.
///
/// # Errors
///
/// Returns an error if the frame exceeds `limit` or is invalid.
pub fn decode_from_limited(buf: &mut BytesMut, limit: usize) -> Result<Option<Frame>, ProtocolError> {
    let Some(length) = frame_length(buf, limit.min(MAX_FRAME_SIZE))? else {
        return Ok(None);
    };

    if buf.len() < LENGTH_PREFIX_SIZE + length {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ActorRef, EntityKey};
    use serde_json::json;

    fn typing_frame() -> Frame {
        Frame::Typing {
            board: "b1".into(),
            card: "c1".into(),
            typing: true,
        }
    }

    #[test]
    fn test_event_frame_survives_codec() {
        let payload = BroadcastPayload::for_event(
            EventName::CardMoved,
            EntityKey::Card,
            json!({"id": "c1", "status": "Done"}),
            ActorRef::new("u1", None),
        );
        let encoded = encode_event("b1", EventName::CardMoved, &payload).unwrap();

        match decode(&encoded).unwrap() {
            Frame::Event {
                board,
                event,
                payload: value,
            } => {
                assert_eq!(board, "b1");
                assert_eq!(event, EventName::CardMoved);
                assert_eq!(BroadcastPayload::from_value(&value).unwrap(), payload);
            }
            other => panic!("Expected event frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::join(1, "test")).unwrap();

        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
        match decode(&encoded[..2]) {
            Err(ProtocolError::Incomplete(2)) => {}
            other => panic!("Expected Incomplete(2), got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let huge = "x".repeat(MAX_FRAME_SIZE + 1);
        let frame = Frame::event("b1", EventName::CardUpdated, json!(huge));

        match encode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_limited_decode_rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        encode_into(&Frame::join(1, "a-rather-long-board-name"), &mut buf).unwrap();
        assert!(matches!(
            decode_from_limited(&mut buf, 8),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::join(1, "b1");
        let frame2 = typing_frame();

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), frame1);
        assert_eq!(decode_from(&mut buf).unwrap().unwrap(), frame2);
        assert!(buf.is_empty());
        assert!(decode_from(&mut buf).unwrap().is_none());
    }
}
