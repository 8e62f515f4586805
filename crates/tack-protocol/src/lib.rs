//! # tack-protocol
//!
//! Wire protocol for Tack board rooms: frame types, the closed broadcast
//! event taxonomy, the fixed broadcast payload shape, and the codec.
//!
//! ## Example
//!
//! ```rust
//! use tack_protocol::{codec, Frame};
//!
//! let frame = Frame::join(1, "6f1c0c1e-3d0b-4b7e-9a57-8f4d2f0c9d11");
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use events::{actions, ActorKey, ActorRef, BroadcastPayload, EntityKey, EventName};
pub use frames::{Frame, FrameType, ParticipantInfo};
pub use version::{Version, PROTOCOL_VERSION};
