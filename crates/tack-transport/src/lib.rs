//! # tack-transport
//!
//! Client channel plumbing for Tack:
//!
//! - **Connection / FrameSource** - write and read halves of a client channel
//! - **TokenVerifier** - identity verification at connect time (JWT)
//! - **WebSocket** - axum WebSocket adapter
//!
//! ```rust,ignore
//! use tack_transport::{split_socket, Connection, FrameSource};
//!
//! let (mut conn, mut frames) = split_socket(socket, ConnectionId::generate(), 64 * 1024);
//! while let Ok(Some(frame)) = frames.recv().await {
//!     // Process frame
//! }
//! ```

pub mod auth;
pub mod traits;
pub mod websocket;

pub use auth::{Claims, JwtVerifier, TokenVerifier};
pub use traits::{Connection, ConnectionId, FrameSource, TransportError};
pub use websocket::{split_socket, FrameBuffer, WebSocketConnection, WebSocketFrames};
