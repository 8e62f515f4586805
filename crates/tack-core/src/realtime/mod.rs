//! Per-board broadcast rooms over authenticated channels.

mod hub;
mod message;
mod presence;
mod room;

pub use hub::{HubConfig, HubError, HubStats, RealtimeHub, Subscription};
pub use message::{BoardEvent, EventId, Origin};
pub use presence::{Presence, PresenceState};
pub use room::{Room, DEFAULT_ROOM_CAPACITY};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ids::UserId;
use crate::model::Actor;

/// Identifies one live client channel (one socket, one browser tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A verified identity a channel is keyed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: UserId, email: Option<String>) -> Self {
        Self { user_id, email }
    }

    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.user_id,
            email: self.email.clone(),
            name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generate() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_identity_actor_ref() {
        let user = UserId::new();
        let identity = Identity::new(user, Some("bo@example.com".into()));
        let actor_ref = identity.actor().actor_ref();
        assert_eq!(actor_ref.id, user.to_string());
        assert_eq!(actor_ref.email.as_deref(), Some("bo@example.com"));
    }
}
