//! Persistence seam.
//!
//! The core assumes a document store offering find-by-id, find-by-filter,
//! atomic single-document field updates (set/push/pull/add-to-set) and
//! filter-scoped multi-document updates and deletes. No cross-document
//! transactions are assumed. Update operations return the updated document
//! (`None` if it does not exist); multi-document operations return the
//! number of documents actually modified.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::ids::{BoardId, CardId, CommentId, ListId, NotificationId, UserId, WorkspaceId};
use crate::model::{Activity, Board, Card, Comment, List, Notification, User, Workspace};

/// Workspaces, boards, lists, cards and users.
#[async_trait]
pub trait BoardStore: Send + Sync {
    async fn user(&self, id: UserId) -> CoreResult<Option<User>>;
    async fn insert_user(&self, user: User) -> CoreResult<()>;

    async fn workspace(&self, id: WorkspaceId) -> CoreResult<Option<Workspace>>;
    async fn insert_workspace(&self, workspace: Workspace) -> CoreResult<()>;
    async fn add_workspace_member(&self, id: WorkspaceId, user: UserId) -> CoreResult<Option<Workspace>>;
    async fn pull_workspace_member(&self, id: WorkspaceId, user: UserId) -> CoreResult<Option<Workspace>>;
    async fn delete_workspace(&self, id: WorkspaceId) -> CoreResult<bool>;
    async fn boards_in_workspace(&self, id: WorkspaceId) -> CoreResult<Vec<Board>>;

    async fn board(&self, id: BoardId) -> CoreResult<Option<Board>>;
    async fn insert_board(&self, board: Board) -> CoreResult<()>;
    async fn set_board_title(&self, id: BoardId, title: &str) -> CoreResult<Option<Board>>;
    async fn add_board_member(&self, id: BoardId, user: UserId) -> CoreResult<Option<Board>>;
    async fn pull_board_member(&self, id: BoardId, user: UserId) -> CoreResult<Option<Board>>;
    /// Hard-delete a board with its lists and cards.
    async fn delete_board_cascade(&self, id: BoardId) -> CoreResult<bool>;

    async fn list(&self, id: ListId) -> CoreResult<Option<List>>;
    async fn insert_list(&self, list: List) -> CoreResult<()>;
    async fn lists_in_board(&self, board: BoardId) -> CoreResult<Vec<List>>;
    async fn set_list_title(&self, id: ListId, title: &str) -> CoreResult<Option<List>>;
    async fn set_list_position(&self, id: ListId, position: u32) -> CoreResult<Option<List>>;
    async fn delete_list(&self, id: ListId) -> CoreResult<bool>;

    async fn card(&self, id: CardId) -> CoreResult<Option<Card>>;
    async fn insert_card(&self, card: Card) -> CoreResult<()>;
    async fn cards_in_board(&self, board: BoardId) -> CoreResult<Vec<Card>>;
    async fn cards_in_list(&self, list: ListId) -> CoreResult<Vec<Card>>;
    /// Cards not completed whose due date falls inside `[from, to]`.
    async fn cards_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> CoreResult<Vec<Card>>;
    async fn set_card_title(&self, id: CardId, title: &str) -> CoreResult<Option<Card>>;
    async fn set_card_position(&self, id: CardId, position: u32) -> CoreResult<Option<Card>>;
    /// Move a card: sets `list_id` and `status` together.
    async fn set_card_list(&self, id: CardId, list: ListId, status: &str) -> CoreResult<Option<Card>>;
    async fn push_card_member(&self, id: CardId, user: UserId) -> CoreResult<Option<Card>>;
    async fn push_comment(&self, id: CardId, comment: Comment) -> CoreResult<Option<Card>>;
    async fn pull_comment(&self, id: CardId, comment: CommentId) -> CoreResult<Option<Card>>;
    async fn push_activity(&self, id: CardId, activity: Activity) -> CoreResult<Option<Card>>;
    async fn delete_card(&self, id: CardId) -> CoreResult<bool>;
    async fn delete_cards_in_list(&self, list: ListId) -> CoreResult<u64>;

    /// Set `status` on every card of a list.
    async fn set_status_for_list(&self, list: ListId, status: &str) -> CoreResult<u64>;
    /// Pull `user` from the assignees of every card in a board.
    async fn pull_card_member_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64>;
    /// Delete every comment by `user` on every card in a board.
    async fn pull_comments_by_author_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64>;
    /// Delete every activity entry by `user` on every card in a board.
    async fn pull_activities_by_author_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64>;
}

/// Notification records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: Notification) -> CoreResult<()>;
    /// Insert unless a notification with the same `dedupe_key` already
    /// exists. Returns `true` if inserted. Notifications without a key are
    /// always inserted.
    async fn insert_notification_once(&self, notification: Notification) -> CoreResult<bool>;
    async fn notification(&self, id: NotificationId) -> CoreResult<Option<Notification>>;
    /// Newest first.
    async fn notifications_for(&self, recipient: UserId) -> CoreResult<Vec<Notification>>;
    async fn mark_notification_read(&self, id: NotificationId) -> CoreResult<bool>;
    async fn delete_notification(&self, id: NotificationId) -> CoreResult<bool>;
}

/// A store backing every core component.
pub trait Store: BoardStore + NotificationStore {}

impl<T: BoardStore + NotificationStore> Store for T {}
