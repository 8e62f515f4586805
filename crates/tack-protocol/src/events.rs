//! Broadcast event taxonomy and payload shape.
//!
//! Every broadcast carries the same payload layout so that one client handler
//! signature services every event:
//!
//! ```text
//! { <entityKey>: entity-or-id, action?: string, <actorKey>: { id, email? } }
//! ```

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Closed set of events a board room can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "board:created")]
    BoardCreated,
    #[serde(rename = "board:updated")]
    BoardUpdated,
    #[serde(rename = "board:deleted")]
    BoardDeleted,
    #[serde(rename = "list:created")]
    ListCreated,
    #[serde(rename = "list:updated")]
    ListUpdated,
    #[serde(rename = "list:deleted")]
    ListDeleted,
    #[serde(rename = "list:reordered")]
    ListReordered,
    #[serde(rename = "card:created")]
    CardCreated,
    #[serde(rename = "card:updated")]
    CardUpdated,
    #[serde(rename = "card:deleted")]
    CardDeleted,
    #[serde(rename = "card:moved")]
    CardMoved,
    #[serde(rename = "card:reordered")]
    CardReordered,
    /// Ephemeral, never persisted.
    #[serde(rename = "card:typing")]
    CardTyping,
    /// Ephemeral, never persisted.
    #[serde(rename = "board:cursor")]
    BoardCursor,
    /// A live channel left the room by disconnecting.
    #[serde(rename = "participant:left")]
    ParticipantLeft,
}

impl EventName {
    /// All event names, in taxonomy order.
    pub const ALL: [EventName; 15] = [
        EventName::BoardCreated,
        EventName::BoardUpdated,
        EventName::BoardDeleted,
        EventName::ListCreated,
        EventName::ListUpdated,
        EventName::ListDeleted,
        EventName::ListReordered,
        EventName::CardCreated,
        EventName::CardUpdated,
        EventName::CardDeleted,
        EventName::CardMoved,
        EventName::CardReordered,
        EventName::CardTyping,
        EventName::BoardCursor,
        EventName::ParticipantLeft,
    ];

    /// The wire name of this event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::BoardCreated => "board:created",
            EventName::BoardUpdated => "board:updated",
            EventName::BoardDeleted => "board:deleted",
            EventName::ListCreated => "list:created",
            EventName::ListUpdated => "list:updated",
            EventName::ListDeleted => "list:deleted",
            EventName::ListReordered => "list:reordered",
            EventName::CardCreated => "card:created",
            EventName::CardUpdated => "card:updated",
            EventName::CardDeleted => "card:deleted",
            EventName::CardMoved => "card:moved",
            EventName::CardReordered => "card:reordered",
            EventName::CardTyping => "card:typing",
            EventName::BoardCursor => "board:cursor",
            EventName::ParticipantLeft => "participant:left",
        }
    }

    /// Whether the event describes transient UI state rather than a mutation.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            EventName::CardTyping | EventName::BoardCursor | EventName::ParticipantLeft
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .iter()
            .find(|e| e.as_str() == s)
            .copied()
            .ok_or_else(|| ProtocolError::Invalid(format!("unknown event: {s}")))
    }
}

/// Action discriminators carried inside `card:updated` for comment changes.
pub mod actions {
    pub const COMMENT_ADDED: &str = "comment:added";
    pub const COMMENT_REMOVED: &str = "comment:removed";
    pub const MEMBER_ADDED: &str = "member:added";
    pub const RENAMED: &str = "renamed";
}

/// Key under which the entity is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Board,
    List,
    Card,
}

impl EntityKey {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKey::Board => "board",
            EntityKey::List => "list",
            EntityKey::Card => "card",
        }
    }

    const ALL: [EntityKey; 3] = [EntityKey::Board, EntityKey::List, EntityKey::Card];
}

/// Key under which the acting user is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKey {
    CreatedBy,
    UpdatedBy,
    DeletedBy,
    MovedBy,
}

impl ActorKey {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKey::CreatedBy => "createdBy",
            ActorKey::UpdatedBy => "updatedBy",
            ActorKey::DeletedBy => "deletedBy",
            ActorKey::MovedBy => "movedBy",
        }
    }

    /// The conventional actor key for an event.
    #[must_use]
    pub fn for_event(event: EventName) -> Self {
        match event {
            EventName::BoardCreated | EventName::ListCreated | EventName::CardCreated => {
                ActorKey::CreatedBy
            }
            EventName::BoardDeleted | EventName::ListDeleted | EventName::CardDeleted => {
                ActorKey::DeletedBy
            }
            EventName::CardMoved => ActorKey::MovedBy,
            _ => ActorKey::UpdatedBy,
        }
    }

    const ALL: [ActorKey; 4] = [
        ActorKey::CreatedBy,
        ActorKey::UpdatedBy,
        ActorKey::DeletedBy,
        ActorKey::MovedBy,
    ];
}

/// Reference to the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ActorRef {
    #[must_use]
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
        }
    }
}

/// A broadcast payload in the fixed wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastPayload {
    pub entity_key: EntityKey,
    /// Full entity, or just its id for deletions.
    pub entity: Value,
    pub action: Option<String>,
    pub actor_key: ActorKey,
    pub actor: ActorRef,
}

impl BroadcastPayload {
    /// Build a payload whose actor key follows the event convention.
    #[must_use]
    pub fn for_event(event: EventName, entity_key: EntityKey, entity: Value, actor: ActorRef) -> Self {
        Self {
            entity_key,
            entity,
            action: None,
            actor_key: ActorKey::for_event(event),
            actor,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Render as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.entity_key.as_str().to_string(), self.entity.clone());
        if let Some(action) = &self.action {
            map.insert("action".to_string(), Value::String(action.clone()));
        }
        let mut actor = Map::new();
        actor.insert("id".to_string(), Value::String(self.actor.id.clone()));
        if let Some(email) = &self.actor.email {
            actor.insert("email".to_string(), Value::String(email.clone()));
        }
        map.insert(self.actor_key.as_str().to_string(), Value::Object(actor));
        Value::Object(map)
    }

    /// Parse a JSON object in the wire shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the object lacks an entity key or an actor key.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::Invalid("payload is not an object".into()))?;

        let (entity_key, entity) = EntityKey::ALL
            .iter()
            .find_map(|k| obj.get(k.as_str()).map(|v| (*k, v.clone())))
            .ok_or_else(|| ProtocolError::Invalid("payload has no entity key".into()))?;

        let (actor_key, actor) = ActorKey::ALL
            .iter()
            .find_map(|k| obj.get(k.as_str()).map(|v| (*k, v.clone())))
            .ok_or_else(|| ProtocolError::Invalid("payload has no actor key".into()))?;
        let actor: ActorRef = serde_json::from_value(actor)
            .map_err(|e| ProtocolError::Invalid(format!("bad actor: {e}")))?;

        let action = obj
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            entity_key,
            entity,
            action,
            actor_key,
            actor,
        })
    }
}

impl Serialize for BroadcastPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.action.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(self.entity_key.as_str(), &self.entity)?;
        if let Some(action) = &self.action {
            map.serialize_entry("action", action)?;
        }
        map.serialize_entry(self.actor_key.as_str(), &self.actor)?;
        map.end()
    }
}
