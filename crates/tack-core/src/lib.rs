//! # tack-core
//!
//! Consistency core for Tack collaborative task boards.
//!
//! - **RoleResolver** - one role per user and board, whichever id the caller holds
//! - **RealtimeHub** - per-board broadcast rooms over authenticated channels
//! - **MembershipCascade** - purge a departed member's card traces
//! - **NotificationFanout** - tell the right people about each mutation, once
//! - **BoardService** - mutation flows composing the above
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   mutation ────▶│ RoleResolver │──── authorize (fail closed)
//!                 └──────┬───────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │    Store     │──── write
//!                 └──────┬───────┘
//!          ┌─────────────┼──────────────┐
//!          ▼             ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │  Cascade   │ │  Fan-out   │ │    Hub     │   (fail open)
//!   └────────────┘ └────────────┘ └────────────┘
//! ```

pub mod cascade;
pub mod error;
pub mod ids;
pub mod model;
pub mod notify;
pub mod realtime;
pub mod role;
pub mod service;
pub mod store;

pub use cascade::{CascadePolicy, CascadeReport, MembershipCascade};
pub use error::{CoreError, CoreResult};
pub use ids::{ActivityId, BoardId, CardId, CommentId, ListId, NotificationId, UserId, WorkspaceId};
pub use model::{
    Activity, Actor, Board, Card, Comment, List, Notification, NotificationKind, Related, User,
    Workspace,
};
pub use notify::{FanoutReport, Inbox, Mutation, NotificationFanout, ReminderSweep, RemovalCause, SweepReport};
pub use realtime::{
    BoardEvent, ConnectionId, HubConfig, HubError, HubStats, Identity, Origin, RealtimeHub,
    Subscription, DEFAULT_ROOM_CAPACITY,
};
pub use role::{Access, Grant, Role, RoleResolver};
pub use service::{BoardService, Dispatch, ServiceConfig};
pub use store::{BoardStore, InMemoryStore, NotificationStore, Store};
