//! Who has a board open.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tack_protocol::ParticipantInfo;
use tracing::debug;

use super::{ConnectionId, Identity};

/// Presence state for a single channel.
#[derive(Debug, Clone)]
pub struct PresenceState {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PresenceState {
    #[must_use]
    pub fn new(connection_id: ConnectionId, identity: Identity) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            identity,
            joined_at: now,
            last_seen: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// No activity for longer than `timeout` as of `now`.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_seen > timeout
    }

    #[must_use]
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: self.connection_id.to_string(),
            user_id: self.identity.user_id.to_string(),
            email: self.identity.email.clone(),
            joined_at: u64::try_from(self.joined_at.timestamp_millis()).unwrap_or_default(),
        }
    }
}

/// Presence tracker for one room.
#[derive(Debug, Default)]
pub struct Presence {
    members: HashMap<ConnectionId, PresenceState>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Returns `true` if the channel was not present before.
    pub fn join(&mut self, connection_id: ConnectionId, identity: Identity) -> bool {
        let is_new = !self.members.contains_key(&connection_id);
        if is_new {
            debug!(connection = %connection_id, user = %identity.user_id, "Presence: participant joined");
        }
        self.members
            .insert(connection_id.clone(), PresenceState::new(connection_id, identity));
        is_new
    }

    pub fn leave(&mut self, connection_id: &ConnectionId) -> Option<PresenceState> {
        let state = self.members.remove(connection_id);
        if state.is_some() {
            debug!(connection = %connection_id, "Presence: participant left");
        }
        state
    }

    /// Refresh `last_seen`. Returns `false` if the channel is not present.
    pub fn touch(&mut self, connection_id: &ConnectionId) -> bool {
        match self.members.get_mut(connection_id) {
            Some(state) => {
                state.touch();
                true
            }
            None => false,
        }
    }

    /// Participants, earliest joiner first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ParticipantInfo> {
        let mut states: Vec<&PresenceState> = self.members.values().collect();
        states.sort_by_key(|s| s.joined_at);
        states.into_iter().map(PresenceState::info).collect()
    }

    /// Channels with no activity for longer than `timeout` as of `now`.
    #[must_use]
    pub fn stale(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<ConnectionId> {
        self.members
            .iter()
            .filter(|(_, s)| s.is_stale(timeout, now))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;

    fn identity(user: UserId) -> Identity {
        Identity::new(user, Some("ana@example.com".into()))
    }

    #[test]
    fn test_presence_join_leave() {
        let mut presence = Presence::new();
        let user = UserId::new();
        let conn = ConnectionId::new("conn-1");

        assert!(presence.join(conn.clone(), identity(user)));
        assert!(!presence.join(conn.clone(), identity(user)));
        assert_eq!(presence.count(), 1);

        let left = presence.leave(&conn).unwrap();
        assert_eq!(left.identity.user_id, user);
        assert!(presence.leave(&conn).is_none());
    }

    #[test]
    fn test_snapshot_carries_identity() {
        let mut presence = Presence::new();
        let user = UserId::new();
        presence.join(ConnectionId::new("conn-1"), identity(user));

        let snapshot = presence.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].connection_id, "conn-1");
        assert_eq!(snapshot[0].user_id, user.to_string());
        assert_eq!(snapshot[0].email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_stale_after_timeout_unless_touched() {
        let mut presence = Presence::new();
        let quiet = ConnectionId::new("quiet");
        presence.join(quiet.clone(), identity(UserId::new()));

        let later = Utc::now() + Duration::seconds(120);
        assert!(presence.stale(Duration::seconds(300), later).is_empty());
        assert_eq!(presence.stale(Duration::seconds(60), later), vec![quiet.clone()]);

        assert!(presence.touch(&quiet));
        assert!(presence.stale(Duration::seconds(60), Utc::now()).is_empty());
        assert!(!presence.touch(&ConnectionId::new("absent")));
    }
}
