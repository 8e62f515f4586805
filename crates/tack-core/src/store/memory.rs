//! In-memory document store.
//!
//! Each collection is a `DashMap`, so single-document updates hold only that
//! document's shard lock: concurrent writers resolve last-write-wins per
//! field, matching a document database without transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::{BoardStore, NotificationStore};
use crate::error::CoreResult;
use crate::ids::{BoardId, CardId, CommentId, ListId, NotificationId, UserId, WorkspaceId};
use crate::model::{
    add_to_set, pull, Activity, Board, Card, Comment, List, Notification, User, Workspace,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: DashMap<UserId, User>,
    workspaces: DashMap<WorkspaceId, Workspace>,
    boards: DashMap<BoardId, Board>,
    lists: DashMap<ListId, List>,
    cards: DashMap<CardId, Card>,
    notifications: DashMap<NotificationId, Notification>,
    dedupe_keys: DashMap<String, NotificationId>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored notifications.
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    fn update_card<F>(&self, id: CardId, f: F) -> Option<Card>
    where
        F: FnOnce(&mut Card),
    {
        self.cards.get_mut(&id).map(|mut card| {
            f(card.value_mut());
            card.updated_at = Utc::now();
            card.clone()
        })
    }

    fn update_board<F>(&self, id: BoardId, f: F) -> Option<Board>
    where
        F: FnOnce(&mut Board),
    {
        self.boards.get_mut(&id).map(|mut board| {
            f(board.value_mut());
            board.updated_at = Utc::now();
            board.clone()
        })
    }

    /// Apply `f` to every card of `board`, counting cards it reports as modified.
    fn update_cards_in_board<F>(&self, board: BoardId, mut f: F) -> u64
    where
        F: FnMut(&mut Card) -> bool,
    {
        let mut modified = 0;
        for mut card in self.cards.iter_mut() {
            if card.board_id == board && f(card.value_mut()) {
                card.updated_at = Utc::now();
                modified += 1;
            }
        }
        modified
    }
}

#[async_trait]
impl BoardStore for InMemoryStore {
    async fn user(&self, id: UserId) -> CoreResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn insert_user(&self, user: User) -> CoreResult<()> {
        self.users.insert(user.id, user);
        Ok(())
    }

    async fn workspace(&self, id: WorkspaceId) -> CoreResult<Option<Workspace>> {
        Ok(self.workspaces.get(&id).map(|w| w.clone()))
    }

    async fn insert_workspace(&self, workspace: Workspace) -> CoreResult<()> {
        self.workspaces.insert(workspace.id, workspace);
        Ok(())
    }

    async fn add_workspace_member(&self, id: WorkspaceId, user: UserId) -> CoreResult<Option<Workspace>> {
        Ok(self.workspaces.get_mut(&id).map(|mut ws| {
            add_to_set(&mut ws.members, user);
            ws.clone()
        }))
    }

    async fn pull_workspace_member(&self, id: WorkspaceId, user: UserId) -> CoreResult<Option<Workspace>> {
        Ok(self.workspaces.get_mut(&id).map(|mut ws| {
            pull(&mut ws.members, user);
            ws.clone()
        }))
    }

    async fn delete_workspace(&self, id: WorkspaceId) -> CoreResult<bool> {
        Ok(self.workspaces.remove(&id).is_some())
    }

    async fn boards_in_workspace(&self, id: WorkspaceId) -> CoreResult<Vec<Board>> {
        Ok(self
            .boards
            .iter()
            .filter(|b| b.workspace == Some(id))
            .map(|b| b.clone())
            .collect())
    }

    async fn board(&self, id: BoardId) -> CoreResult<Option<Board>> {
        Ok(self.boards.get(&id).map(|b| b.clone()))
    }

    async fn insert_board(&self, board: Board) -> CoreResult<()> {
        self.boards.insert(board.id, board);
        Ok(())
    }

    async fn set_board_title(&self, id: BoardId, title: &str) -> CoreResult<Option<Board>> {
        Ok(self.update_board(id, |b| b.title = title.to_string()))
    }

    async fn add_board_member(&self, id: BoardId, user: UserId) -> CoreResult<Option<Board>> {
        Ok(self.update_board(id, |b| {
            add_to_set(&mut b.members, user);
        }))
    }

    async fn pull_board_member(&self, id: BoardId, user: UserId) -> CoreResult<Option<Board>> {
        Ok(self.update_board(id, |b| {
            pull(&mut b.members, user);
        }))
    }

    async fn delete_board_cascade(&self, id: BoardId) -> CoreResult<bool> {
        let existed = self.boards.remove(&id).is_some();
        self.lists.retain(|_, l| l.board_id != id);
        self.cards.retain(|_, c| c.board_id != id);
        trace!(board = %id, existed, "Board hard-deleted");
        Ok(existed)
    }

    async fn list(&self, id: ListId) -> CoreResult<Option<List>> {
        Ok(self.lists.get(&id).map(|l| l.clone()))
    }

    async fn insert_list(&self, list: List) -> CoreResult<()> {
        self.lists.insert(list.id, list);
        Ok(())
    }

    async fn lists_in_board(&self, board: BoardId) -> CoreResult<Vec<List>> {
        let mut lists: Vec<List> = self
            .lists
            .iter()
            .filter(|l| l.board_id == board)
            .map(|l| l.clone())
            .collect();
        lists.sort_by_key(|l| l.position);
        Ok(lists)
    }

    async fn set_list_title(&self, id: ListId, title: &str) -> CoreResult<Option<List>> {
        Ok(self.lists.get_mut(&id).map(|mut l| {
            l.title = title.to_string();
            l.clone()
        }))
    }

    async fn set_list_position(&self, id: ListId, position: u32) -> CoreResult<Option<List>> {
        Ok(self.lists.get_mut(&id).map(|mut l| {
            l.position = position;
            l.clone()
        }))
    }

    async fn delete_list(&self, id: ListId) -> CoreResult<bool> {
        Ok(self.lists.remove(&id).is_some())
    }

    async fn card(&self, id: CardId) -> CoreResult<Option<Card>> {
        Ok(self.cards.get(&id).map(|c| c.clone()))
    }

    async fn insert_card(&self, card: Card) -> CoreResult<()> {
        self.cards.insert(card.id, card);
        Ok(())
    }

    async fn cards_in_board(&self, board: BoardId) -> CoreResult<Vec<Card>> {
        Ok(self
            .cards
            .iter()
            .filter(|c| c.board_id == board)
            .map(|c| c.clone())
            .collect())
    }

    async fn cards_in_list(&self, list: ListId) -> CoreResult<Vec<Card>> {
        let mut cards: Vec<Card> = self
            .cards
            .iter()
            .filter(|c| c.list_id == list)
            .map(|c| c.clone())
            .collect();
        cards.sort_by_key(|c| c.position);
        Ok(cards)
    }

    async fn cards_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> CoreResult<Vec<Card>> {
        Ok(self
            .cards
            .iter()
            .filter(|c| !c.completed)
            .filter(|c| c.due_date.is_some_and(|due| due >= from && due <= to))
            .map(|c| c.clone())
            .collect())
    }

    async fn set_card_title(&self, id: CardId, title: &str) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| c.title = title.to_string()))
    }

    async fn set_card_position(&self, id: CardId, position: u32) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| c.position = position))
    }

    async fn set_card_list(&self, id: CardId, list: ListId, status: &str) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| {
            c.list_id = list;
            c.status = status.to_string();
        }))
    }

    async fn push_card_member(&self, id: CardId, user: UserId) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| {
            add_to_set(&mut c.members, user);
        }))
    }

    async fn push_comment(&self, id: CardId, comment: Comment) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| c.comments.push(comment)))
    }

    async fn pull_comment(&self, id: CardId, comment: CommentId) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| c.comments.retain(|x| x.id != comment)))
    }

    async fn push_activity(&self, id: CardId, activity: Activity) -> CoreResult<Option<Card>> {
        Ok(self.update_card(id, |c| c.activities.push(activity)))
    }

    async fn delete_card(&self, id: CardId) -> CoreResult<bool> {
        Ok(self.cards.remove(&id).is_some())
    }

    async fn delete_cards_in_list(&self, list: ListId) -> CoreResult<u64> {
        let mut removed = 0;
        self.cards.retain(|_, c| {
            let keep = c.list_id != list;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn set_status_for_list(&self, list: ListId, status: &str) -> CoreResult<u64> {
        let mut modified = 0;
        for mut card in self.cards.iter_mut() {
            if card.list_id == list && card.status != status {
                card.status = status.to_string();
                card.updated_at = Utc::now();
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn pull_card_member_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64> {
        Ok(self.update_cards_in_board(board, |c| pull(&mut c.members, user)))
    }

    async fn pull_comments_by_author_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64> {
        Ok(self.update_cards_in_board(board, |c| {
            let before = c.comments.len();
            c.comments.retain(|x| x.author != user);
            c.comments.len() != before
        }))
    }

    async fn pull_activities_by_author_in_board(&self, board: BoardId, user: UserId) -> CoreResult<u64> {
        Ok(self.update_cards_in_board(board, |c| {
            let before = c.activities.len();
            c.activities.retain(|x| x.author != user);
            c.activities.len() != before
        }))
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert_notification(&self, notification: Notification) -> CoreResult<()> {
        self.notifications.insert(notification.id, notification);
        Ok(())
    }

    async fn insert_notification_once(&self, notification: Notification) -> CoreResult<bool> {
        let Some(key) = notification.dedupe_key.clone() else {
            self.notifications.insert(notification.id, notification);
            return Ok(true);
        };

        match self.dedupe_keys.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(notification.id);
                self.notifications.insert(notification.id, notification);
                Ok(true)
            }
        }
    }

    async fn notification(&self, id: NotificationId) -> CoreResult<Option<Notification>> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn notifications_for(&self, recipient: UserId) -> CoreResult<Vec<Notification>> {
        let mut found: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn mark_notification_read(&self, id: NotificationId) -> CoreResult<bool> {
        Ok(self
            .notifications
            .get_mut(&id)
            .map(|mut n| n.read = true)
            .is_some())
    }

    async fn delete_notification(&self, id: NotificationId) -> CoreResult<bool> {
        // The dedupe key stays claimed so a deleted reminder is not re-sent the same day.
        Ok(self.notifications.remove(&id).is_some())
    }
}
