//! Persisted entities: workspaces, boards, lists, cards and notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tack_protocol::ActorRef;

use crate::ids::{
    ActivityId, BoardId, CardId, CommentId, ListId, NotificationId, UserId, WorkspaceId,
};

/// Insert `user` unless already present. Returns `true` if inserted.
pub(crate) fn add_to_set(set: &mut Vec<UserId>, user: UserId) -> bool {
    if set.contains(&user) {
        false
    } else {
        set.push(user);
        true
    }
}

/// Remove every occurrence of `user`. Returns `true` if anything was removed.
pub(crate) fn pull(set: &mut Vec<UserId>, user: UserId) -> bool {
    let before = set.len();
    set.retain(|u| *u != user);
    set.len() != before
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
}

impl User {
    #[must_use]
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: email.into(),
            name: name.into(),
        }
    }
}

/// The user performing a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Actor {
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            email: None,
            name: None,
        }
    }

    /// Name used in notification messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "Someone".to_string())
    }

    /// Actor reference as carried in broadcast payloads.
    #[must_use]
    pub fn actor_ref(&self) -> ActorRef {
        ActorRef::new(self.id.to_string(), self.email.clone())
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: Some(user.email.clone()),
            name: Some(user.name.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub owner: UserId,
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    #[must_use]
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        Self {
            id: WorkspaceId::new(),
            name: name.into(),
            owner,
            members: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Owner or member.
    #[must_use]
    pub fn includes(&self, user: UserId) -> bool {
        self.owner == user || self.members.contains(&user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub title: String,
    pub description: Option<String>,
    pub background: Option<String>,
    pub owner: UserId,
    /// Never duplicates; conventionally contains the owner.
    pub members: Vec<UserId>,
    /// Set once at creation.
    pub workspace: Option<WorkspaceId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Board {
    #[must_use]
    pub fn new(title: impl Into<String>, owner: UserId, workspace: Option<WorkspaceId>) -> Self {
        let now = Utc::now();
        Self {
            id: BoardId::new(),
            title: title.into(),
            description: None,
            background: None,
            owner,
            members: vec![owner],
            workspace,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_member(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: ListId,
    pub board_id: BoardId,
    pub title: String,
    pub position: u32,
}

impl List {
    #[must_use]
    pub fn new(board_id: BoardId, title: impl Into<String>, position: u32) -> Self {
        Self {
            id: ListId::new(),
            board_id,
            title: title.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    #[must_use]
    pub fn new(author: UserId, text: impl Into<String>) -> Self {
        Self {
            id: CommentId::new(),
            author,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub author: UserId,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    #[must_use]
    pub fn new(author: UserId, action: impl Into<String>) -> Self {
        Self {
            id: ActivityId::new(),
            author,
            action: action.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub board_id: BoardId,
    pub list_id: ListId,
    pub title: String,
    pub description: Option<String>,
    pub position: u32,
    /// Mirror of the owning list's title.
    pub status: String,
    /// Assignees.
    pub members: Vec<UserId>,
    pub labels: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: bool,
    pub created_by: UserId,
    pub comments: Vec<Comment>,
    pub activities: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// A new card in `list`; board and status are taken from the list.
    #[must_use]
    pub fn new(list: &List, title: impl Into<String>, created_by: UserId, position: u32) -> Self {
        let now = Utc::now();
        Self {
            id: CardId::new(),
            board_id: list.board_id,
            list_id: list.id,
            title: title.into(),
            description: None,
            position,
            status: list.title.clone(),
            members: Vec::new(),
            labels: Vec::new(),
            due_date: None,
            completed: false,
            created_by,
            comments: Vec::new(),
            activities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Whether `user` is still referenced anywhere on this card.
    #[must_use]
    pub fn references(&self, user: UserId) -> bool {
        self.members.contains(&user)
            || self.comments.iter().any(|c| c.author == user)
            || self.activities.iter().any(|a| a.author == user)
    }
}

/// Notification type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BoardRenamed,
    BoardMemberAdded,
    BoardMemberRemoved,
    BoardDeleted,
    ListCreated,
    ListRenamed,
    ListDeleted,
    CardMoved,
    CardMemberAdded,
    CardRenamed,
    CardDeleted,
    WorkspaceMemberAdded,
    WorkspaceMemberRemoved,
    WorkspaceDeleted,
    DueSoon,
}

/// Context references attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Related {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board: Option<BoardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient: UserId,
    /// Acting user; `None` for system-originated reminders.
    pub sender: Option<UserId>,
    pub kind: NotificationKind,
    pub message: String,
    pub related: Related,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
}

impl Notification {
    #[must_use]
    pub fn new(
        recipient: UserId,
        sender: Option<UserId>,
        kind: NotificationKind,
        message: impl Into<String>,
        related: Related,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            recipient,
            sender,
            kind,
            message: message.into(),
            related,
            read: false,
            created_at: Utc::now(),
            dedupe_key: None,
        }
    }

    #[must_use]
    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}
