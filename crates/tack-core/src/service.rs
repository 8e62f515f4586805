//! Board mutation flows.
//!
//! Each flow authorizes through [`RoleResolver`] and fails closed, writes
//! through the store, then runs its post-write steps: membership cascade,
//! notification fan-out and realtime publish. The post-write steps are
//! independent of each other and fail open.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tack_protocol::{actions, BroadcastPayload, EntityKey, EventName};
use tracing::{debug, warn};

use crate::cascade::{CascadePolicy, MembershipCascade};
use crate::error::{CoreError, CoreResult};
use crate::ids::{BoardId, CardId, CommentId, ListId, NotificationId, UserId, WorkspaceId};
use crate::model::{Activity, Actor, Board, Card, Comment, List, Notification, Workspace};
use crate::notify::{Inbox, Mutation, NotificationFanout, RemovalCause};
use crate::realtime::RealtimeHub;
use crate::role::{Role, RoleResolver};
use crate::store::{BoardStore, Store};

/// Where cascade and fan-out run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Dispatch {
    /// Awaited before the flow returns.
    #[default]
    Inline,
    /// Spawned onto the runtime; the flow returns after the write.
    Detached,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceConfig {
    pub dispatch: Dispatch,
    pub cascade: CascadePolicy,
}

enum CascadeJob {
    Board(BoardId, UserId),
    Workspace(WorkspaceId, UserId),
}

/// Post-write work for one mutation.
#[derive(Default)]
struct Effects {
    cascade: Option<CascadeJob>,
    mutation: Option<Mutation>,
    broadcast: Option<(BoardId, EventName, BroadcastPayload)>,
}

impl Effects {
    fn cascade(mut self, job: CascadeJob) -> Self {
        self.cascade = Some(job);
        self
    }

    fn notify(mut self, mutation: Mutation) -> Self {
        self.mutation = Some(mutation);
        self
    }

    fn publish(mut self, board: BoardId, event: EventName, payload: BroadcastPayload) -> Self {
        self.broadcast = Some((board, event, payload));
        self
    }
}

fn entity_json<T: Serialize>(entity: &T) -> Value {
    serde_json::to_value(entity).unwrap_or(Value::Null)
}

fn id_json(id: impl ToString) -> Value {
    Value::String(id.to_string())
}

/// `order` must name every id in `current` exactly once.
fn check_order<T: Copy + Eq + Hash>(current: impl IntoIterator<Item = T>, order: &[T], what: &str) -> CoreResult<()> {
    let current: HashSet<T> = current.into_iter().collect();
    let requested: HashSet<T> = order.iter().copied().collect();
    if requested.len() != order.len() || requested != current {
        return Err(CoreError::Validation(format!("new order must name every {what} exactly once")));
    }
    Ok(())
}

fn position_of(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[derive(Clone)]
pub struct BoardService {
    store: Arc<dyn BoardStore>,
    resolver: RoleResolver,
    hub: Arc<RealtimeHub>,
    cascade: MembershipCascade,
    fanout: NotificationFanout,
    inbox: Inbox,
    dispatch: Dispatch,
}

impl BoardService {
    #[must_use]
    pub fn new<S: Store + 'static>(store: Arc<S>, hub: Arc<RealtimeHub>, config: ServiceConfig) -> Self {
        Self {
            store: store.clone(),
            resolver: RoleResolver::new(store.clone()),
            hub,
            cascade: MembershipCascade::with_policy(store.clone(), config.cascade),
            fanout: NotificationFanout::new(store.clone()),
            inbox: Inbox::new(store),
            dispatch: config.dispatch,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &RoleResolver {
        &self.resolver
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    async fn finish(&self, actor: &Actor, effects: Effects) {
        if let Some((board, event, payload)) = effects.broadcast {
            let delivered = self.hub.publish(board, event, &payload);
            debug!(board = %board, event = %event, delivered, "Mutation broadcast");
        }

        match self.dispatch {
            Dispatch::Inline => {
                tokio::join!(
                    run_cascade(self.cascade.clone(), effects.cascade),
                    run_fanout(self.fanout.clone(), effects.mutation, actor.clone()),
                );
            }
            Dispatch::Detached => {
                if effects.cascade.is_some() {
                    tokio::spawn(run_cascade(self.cascade.clone(), effects.cascade));
                }
                if effects.mutation.is_some() {
                    tokio::spawn(run_fanout(self.fanout.clone(), effects.mutation, actor.clone()));
                }
            }
        }
    }

    async fn workspace(&self, id: WorkspaceId) -> CoreResult<Workspace> {
        self.store
            .workspace(id)
            .await?
            .ok_or_else(|| CoreError::not_found("workspace", id))
    }

    // Boards

    /// Create a board owned by the actor. Inside a workspace the actor must
    /// be its owner or a member.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing workspace, `Forbidden` for outsiders.
    pub async fn create_board(
        &self,
        actor: &Actor,
        title: &str,
        workspace: Option<WorkspaceId>,
    ) -> CoreResult<Board> {
        if let Some(ws_id) = workspace {
            let ws = self.workspace(ws_id).await?;
            if !ws.includes(actor.id) {
                return Err(CoreError::forbidden("only workspace members may create boards in it"));
            }
        }
        let board = Board::new(title, actor.id, workspace);
        self.store.insert_board(board.clone()).await?;
        let payload = BroadcastPayload::for_event(
            EventName::BoardCreated,
            EntityKey::Board,
            entity_json(&board),
            actor.actor_ref(),
        );
        self.finish(actor, Effects::default().publish(board.id, EventName::BoardCreated, payload))
            .await;
        Ok(board)
    }

    /// # Errors
    ///
    /// `NotFound` for a missing board, `Forbidden` unless the actor owns it.
    pub async fn rename_board(&self, actor: &Actor, board_id: BoardId, title: &str) -> CoreResult<Board> {
        self.resolver
            .board_access(board_id, actor.id)
            .await?
            .require(Role::Owner)?;
        let board = self
            .store
            .set_board_title(board_id, title)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::BoardUpdated,
            EntityKey::Board,
            entity_json(&board),
            actor.actor_ref(),
        )
        .with_action(actions::RENAMED);
        let effects = Effects::default()
            .publish(board.id, EventName::BoardUpdated, payload)
            .notify(Mutation::BoardRenamed { board: board.clone() });
        self.finish(actor, effects).await;
        Ok(board)
    }

    /// The actor joins the board. Accepting again is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing board, `Forbidden` if the board belongs to a
    /// workspace the actor is not part of.
    pub async fn accept_invite(&self, actor: &Actor, board_id: BoardId) -> CoreResult<Board> {
        let board = self
            .store
            .board(board_id)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;
        if board.is_member(actor.id) {
            return Ok(board);
        }
        if let Some(ws_id) = board.workspace {
            let admitted = self
                .store
                .workspace(ws_id)
                .await?
                .is_some_and(|ws| ws.includes(actor.id));
            if !admitted {
                return Err(CoreError::forbidden(
                    "only workspace members may join boards in that workspace",
                ));
            }
        }

        let board = self
            .store
            .add_board_member(board_id, actor.id)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::BoardUpdated,
            EntityKey::Board,
            entity_json(&board),
            actor.actor_ref(),
        )
        .with_action(actions::MEMBER_ADDED);
        let effects = Effects::default()
            .publish(board.id, EventName::BoardUpdated, payload)
            .notify(Mutation::BoardMemberAdded {
                board: board.clone(),
                added: actor.id,
            });
        self.finish(actor, effects).await;
        Ok(board)
    }

    /// Remove another member from the board and purge their card traces.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor, `Conflict` when targeting the owner,
    /// `NotFound` if the user is not a member.
    pub async fn remove_board_member(&self, actor: &Actor, board_id: BoardId, member: UserId) -> CoreResult<Board> {
        if member == actor.id {
            return self.leave_board(actor, board_id).await;
        }
        let access = self
            .resolver
            .board_access(board_id, actor.id)
            .await?
            .require(Role::Editor)?;
        if access.board.owner == member {
            return Err(CoreError::Conflict("the board owner cannot be removed".into()));
        }
        if !access.board.is_member(member) {
            return Err(CoreError::not_found("board member", member));
        }

        let board = self
            .store
            .pull_board_member(board_id, member)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::BoardUpdated,
            EntityKey::Board,
            entity_json(&board),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .cascade(CascadeJob::Board(board_id, member))
            .publish(board_id, EventName::BoardUpdated, payload)
            .notify(Mutation::BoardMemberRemoved {
                board: board.clone(),
                removed: member,
                cause: RemovalCause::Removed,
            });
        self.finish(actor, effects).await;
        Ok(board)
    }

    /// # Errors
    ///
    /// `Conflict` for the owner or a non-member.
    pub async fn leave_board(&self, actor: &Actor, board_id: BoardId) -> CoreResult<Board> {
        let board = self
            .store
            .board(board_id)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;
        if board.owner == actor.id {
            return Err(CoreError::Conflict("the board owner cannot leave".into()));
        }
        if !board.is_member(actor.id) {
            return Err(CoreError::Conflict("not a member of this board".into()));
        }

        let board = self
            .store
            .pull_board_member(board_id, actor.id)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::BoardUpdated,
            EntityKey::Board,
            entity_json(&board),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .cascade(CascadeJob::Board(board_id, actor.id))
            .publish(board_id, EventName::BoardUpdated, payload)
            .notify(Mutation::BoardMemberRemoved {
                board: board.clone(),
                removed: actor.id,
                cause: RemovalCause::Left,
            });
        self.finish(actor, effects).await;
        Ok(board)
    }

    /// Hard-delete the board with its lists and cards.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the actor owns the board.
    pub async fn delete_board(&self, actor: &Actor, board_id: BoardId) -> CoreResult<()> {
        let access = self
            .resolver
            .board_access(board_id, actor.id)
            .await?
            .require(Role::Owner)?;
        self.store.delete_board_cascade(board_id).await?;

        let payload = BroadcastPayload::for_event(
            EventName::BoardDeleted,
            EntityKey::Board,
            id_json(board_id),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .publish(board_id, EventName::BoardDeleted, payload)
            .notify(Mutation::BoardDeleted { board: access.board });
        self.finish(actor, effects).await;
        Ok(())
    }

    // Lists

    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn create_list(&self, actor: &Actor, board_id: BoardId, title: &str) -> CoreResult<List> {
        let access = self
            .resolver
            .board_access(board_id, actor.id)
            .await?
            .require(Role::Editor)?;
        let position = u32::try_from(self.store.lists_in_board(board_id).await?.len()).unwrap_or(u32::MAX);
        let list = List::new(board_id, title, position);
        self.store.insert_list(list.clone()).await?;

        let payload = BroadcastPayload::for_event(
            EventName::ListCreated,
            EntityKey::List,
            entity_json(&list),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .publish(board_id, EventName::ListCreated, payload)
            .notify(Mutation::ListCreated {
                board: access.board,
                list: list.clone(),
            });
        self.finish(actor, effects).await;
        Ok(list)
    }

    /// Rename a list and re-sync the status of its cards.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn rename_list(&self, actor: &Actor, list_id: ListId, title: &str) -> CoreResult<List> {
        let (access, previous) = self.resolver.list_access(list_id, actor.id).await?;
        let access = access.require(Role::Editor)?;
        let list = self
            .store
            .set_list_title(list_id, title)
            .await?
            .ok_or_else(|| CoreError::not_found("list", list_id))?;
        let resynced = self.store.set_status_for_list(list_id, title).await?;
        debug!(list = %list_id, cards = resynced, "Card status re-synced");

        let payload = BroadcastPayload::for_event(
            EventName::ListUpdated,
            EntityKey::List,
            entity_json(&list),
            actor.actor_ref(),
        )
        .with_action(actions::RENAMED);
        let effects = Effects::default()
            .publish(list.board_id, EventName::ListUpdated, payload)
            .notify(Mutation::ListRenamed {
                board: access.board,
                list: list.clone(),
                previous_title: previous.title,
            });
        self.finish(actor, effects).await;
        Ok(list)
    }

    /// Delete a list and its cards.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn delete_list(&self, actor: &Actor, list_id: ListId) -> CoreResult<()> {
        let (access, list) = self.resolver.list_access(list_id, actor.id).await?;
        let access = access.require(Role::Editor)?;
        let cards = self.store.delete_cards_in_list(list_id).await?;
        self.store.delete_list(list_id).await?;
        debug!(list = %list_id, cards, "List deleted");

        let payload = BroadcastPayload::for_event(
            EventName::ListDeleted,
            EntityKey::List,
            id_json(list_id),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .publish(list.board_id, EventName::ListDeleted, payload)
            .notify(Mutation::ListDeleted {
                board: access.board,
                list,
            });
        self.finish(actor, effects).await;
        Ok(())
    }

    /// Set the position of every list on a board, in the given order.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor, `Validation` unless `order` names each of
    /// the board's lists exactly once.
    pub async fn reorder_lists(&self, actor: &Actor, board_id: BoardId, order: &[ListId]) -> CoreResult<Vec<List>> {
        self.resolver
            .board_access(board_id, actor.id)
            .await?
            .require(Role::Editor)?;
        let current = self.store.lists_in_board(board_id).await?;
        check_order(current.iter().map(|l| l.id), order, "list")?;

        let mut lists = Vec::with_capacity(order.len());
        for (index, list_id) in order.iter().enumerate() {
            let list = self
                .store
                .set_list_position(*list_id, position_of(index))
                .await?
                .ok_or_else(|| CoreError::not_found("list", *list_id))?;
            lists.push(list);
        }

        let payload = BroadcastPayload::for_event(
            EventName::ListReordered,
            EntityKey::List,
            entity_json(&lists),
            actor.actor_ref(),
        );
        self.finish(actor, Effects::default().publish(board_id, EventName::ListReordered, payload))
            .await;
        Ok(lists)
    }

    // Cards

    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn create_card(&self, actor: &Actor, list_id: ListId, title: &str) -> CoreResult<Card> {
        let (access, list) = self.resolver.list_access(list_id, actor.id).await?;
        access.require(Role::Editor)?;
        let position = u32::try_from(self.store.cards_in_list(list_id).await?.len()).unwrap_or(u32::MAX);
        let card = Card::new(&list, title, actor.id, position);
        self.store.insert_card(card.clone()).await?;

        let payload = BroadcastPayload::for_event(
            EventName::CardCreated,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        );
        self.finish(actor, Effects::default().publish(card.board_id, EventName::CardCreated, payload))
            .await;
        Ok(card)
    }

    /// Move a card to another list of the same board; its status follows the
    /// target list's title. Moving within the same list is a no-op.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor, `Validation` for a list on another board.
    pub async fn move_card(&self, actor: &Actor, card_id: CardId, to_list: ListId) -> CoreResult<Card> {
        let (access, card) = self.resolver.card_access(card_id, actor.id).await?;
        access.require(Role::Editor)?;
        if card.list_id == to_list {
            return Ok(card);
        }
        let to = self
            .store
            .list(to_list)
            .await?
            .ok_or_else(|| CoreError::not_found("list", to_list))?;
        if to.board_id != card.board_id {
            return Err(CoreError::Validation("cannot move a card to another board".into()));
        }
        let from = self
            .store
            .list(card.list_id)
            .await?
            .ok_or_else(|| CoreError::not_found("list", card.list_id))?;

        self.store
            .set_card_list(card_id, to.id, &to.title)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;
        let activity = Activity::new(actor.id, format!("moved card from \"{}\" to \"{}\"", from.title, to.title));
        let card = self
            .store
            .push_activity(card_id, activity)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::CardMoved,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .publish(card.board_id, EventName::CardMoved, payload)
            .notify(Mutation::CardMoved {
                card: card.clone(),
                from,
                to,
            });
        self.finish(actor, effects).await;
        Ok(card)
    }

    /// Set the position of every card in a list, in the given order.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor, `Validation` unless `order` names each of
    /// the list's cards exactly once.
    pub async fn reorder_cards(&self, actor: &Actor, list_id: ListId, order: &[CardId]) -> CoreResult<Vec<Card>> {
        let (access, list) = self.resolver.list_access(list_id, actor.id).await?;
        access.require(Role::Editor)?;
        let current = self.store.cards_in_list(list_id).await?;
        check_order(current.iter().map(|c| c.id), order, "card")?;

        let mut cards = Vec::with_capacity(order.len());
        for (index, card_id) in order.iter().enumerate() {
            let card = self
                .store
                .set_card_position(*card_id, position_of(index))
                .await?
                .ok_or_else(|| CoreError::not_found("card", *card_id))?;
            cards.push(card);
        }

        let payload = BroadcastPayload::for_event(
            EventName::CardReordered,
            EntityKey::Card,
            entity_json(&cards),
            actor.actor_ref(),
        );
        self.finish(actor, Effects::default().publish(list.board_id, EventName::CardReordered, payload))
            .await;
        Ok(cards)
    }

    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn rename_card(&self, actor: &Actor, card_id: CardId, title: &str) -> CoreResult<Card> {
        let (access, previous) = self.resolver.card_access(card_id, actor.id).await?;
        access.require(Role::Editor)?;
        let card = self
            .store
            .set_card_title(card_id, title)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::CardUpdated,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        )
        .with_action(actions::RENAMED);
        let effects = Effects::default()
            .publish(card.board_id, EventName::CardUpdated, payload)
            .notify(Mutation::CardRenamed {
                card: card.clone(),
                previous_title: previous.title,
            });
        self.finish(actor, effects).await;
        Ok(card)
    }

    /// Assign a user with access to the board. Assigning twice is a no-op.
    ///
    /// # Errors
    ///
    /// `Forbidden` below editor, `Validation` if the assignee has no access
    /// to the board.
    pub async fn add_card_member(&self, actor: &Actor, card_id: CardId, member: UserId) -> CoreResult<Card> {
        let (access, card) = self.resolver.card_access(card_id, actor.id).await?;
        let access = access.require(Role::Editor)?;
        if card.members.contains(&member) {
            return Ok(card);
        }
        if !self.resolver.access_to(access.board, member).await?.has_access {
            return Err(CoreError::Validation(format!("user {member} has no access to this board")));
        }

        self.store
            .push_card_member(card_id, member)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;
        let card = self
            .store
            .push_activity(card_id, Activity::new(actor.id, "added a member"))
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::CardUpdated,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        )
        .with_action(actions::MEMBER_ADDED);
        let effects = Effects::default()
            .publish(card.board_id, EventName::CardUpdated, payload)
            .notify(Mutation::CardMemberAdded {
                card: card.clone(),
                added: member,
            });
        self.finish(actor, effects).await;
        Ok(card)
    }

    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn delete_card(&self, actor: &Actor, card_id: CardId) -> CoreResult<()> {
        let (access, card) = self.resolver.card_access(card_id, actor.id).await?;
        access.require(Role::Editor)?;
        self.store.delete_card(card_id).await?;

        let payload = BroadcastPayload::for_event(
            EventName::CardDeleted,
            EntityKey::Card,
            id_json(card_id),
            actor.actor_ref(),
        );
        let effects = Effects::default()
            .publish(card.board_id, EventName::CardDeleted, payload)
            .notify(Mutation::CardDeleted { card });
        self.finish(actor, effects).await;
        Ok(())
    }

    /// # Errors
    ///
    /// `Forbidden` below editor.
    pub async fn add_comment(&self, actor: &Actor, card_id: CardId, text: &str) -> CoreResult<Card> {
        let (access, _) = self.resolver.card_access(card_id, actor.id).await?;
        access.require(Role::Editor)?;
        let card = self
            .store
            .push_comment(card_id, Comment::new(actor.id, text))
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::CardUpdated,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        )
        .with_action(actions::COMMENT_ADDED);
        self.finish(actor, Effects::default().publish(card.board_id, EventName::CardUpdated, payload))
            .await;
        Ok(card)
    }

    /// Only the author may remove a comment.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing comment, `Forbidden` for anyone but its author.
    pub async fn remove_comment(&self, actor: &Actor, card_id: CardId, comment_id: CommentId) -> CoreResult<Card> {
        let (access, card) = self.resolver.card_access(card_id, actor.id).await?;
        access.require(Role::Editor)?;
        let comment = card
            .comments
            .iter()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| CoreError::not_found("comment", comment_id))?;
        if comment.author != actor.id {
            return Err(CoreError::forbidden("only the author may remove a comment"));
        }

        let card = self
            .store
            .pull_comment(card_id, comment_id)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;

        let payload = BroadcastPayload::for_event(
            EventName::CardUpdated,
            EntityKey::Card,
            entity_json(&card),
            actor.actor_ref(),
        )
        .with_action(actions::COMMENT_REMOVED);
        self.finish(actor, Effects::default().publish(card.board_id, EventName::CardUpdated, payload))
            .await;
        Ok(card)
    }

    // Workspaces

    /// The owner or any member may add a member. Adding twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing workspace, `Forbidden` for outsiders.
    pub async fn add_workspace_member(
        &self,
        actor: &Actor,
        workspace_id: WorkspaceId,
        member: UserId,
    ) -> CoreResult<Workspace> {
        let before = self.workspace(workspace_id).await?;
        if !before.includes(actor.id) {
            return Err(CoreError::forbidden("only workspace members may add members"));
        }
        if before.includes(member) {
            return Ok(before);
        }
        let after = self
            .store
            .add_workspace_member(workspace_id, member)
            .await?
            .ok_or_else(|| CoreError::not_found("workspace", workspace_id))?;

        let effects = Effects::default().notify(Mutation::WorkspaceMemberAdded {
            before,
            after: after.clone(),
            member,
        });
        self.finish(actor, effects).await;
        Ok(after)
    }

    /// The owner may remove anyone but themself; a member may remove themself.
    /// Traces are purged from every board where access came only from the
    /// workspace.
    ///
    /// # Errors
    ///
    /// `Forbidden` for anyone else, `Conflict` when targeting the owner,
    /// `NotFound` if the user is not a member.
    pub async fn remove_workspace_member(
        &self,
        actor: &Actor,
        workspace_id: WorkspaceId,
        member: UserId,
    ) -> CoreResult<Workspace> {
        let before = self.workspace(workspace_id).await?;
        if before.owner == member {
            return Err(CoreError::Conflict("the workspace owner cannot be removed".into()));
        }
        if before.owner != actor.id && actor.id != member {
            return Err(CoreError::forbidden("only the workspace owner may remove members"));
        }
        if !before.members.contains(&member) {
            return Err(CoreError::not_found("workspace member", member));
        }
        let after = self
            .store
            .pull_workspace_member(workspace_id, member)
            .await?
            .ok_or_else(|| CoreError::not_found("workspace", workspace_id))?;

        let effects = Effects::default()
            .cascade(CascadeJob::Workspace(workspace_id, member))
            .notify(Mutation::WorkspaceMemberRemoved {
                before,
                after: after.clone(),
                member,
            });
        self.finish(actor, effects).await;
        Ok(after)
    }

    /// Boards of the workspace keep existing; their workspace reference
    /// dangles and grants nothing.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the actor owns the workspace.
    pub async fn delete_workspace(&self, actor: &Actor, workspace_id: WorkspaceId) -> CoreResult<()> {
        let workspace = self.workspace(workspace_id).await?;
        if workspace.owner != actor.id {
            return Err(CoreError::forbidden("only the workspace owner may delete it"));
        }
        self.store.delete_workspace(workspace_id).await?;
        self.finish(actor, Effects::default().notify(Mutation::WorkspaceDeleted { workspace }))
            .await;
        Ok(())
    }

    // Notifications

    /// # Errors
    ///
    /// Returns a store error.
    pub async fn notifications_for(&self, user: UserId) -> CoreResult<Vec<Notification>> {
        self.inbox.notifications_for(user).await
    }

    /// # Errors
    ///
    /// `NotFound` if missing, `Forbidden` if the user is not the recipient.
    pub async fn mark_read(&self, id: NotificationId, user: UserId) -> CoreResult<()> {
        self.inbox.mark_read(id, user).await
    }

    /// # Errors
    ///
    /// `NotFound` if missing, `Forbidden` if the user is not the recipient.
    pub async fn delete_notification(&self, id: NotificationId, user: UserId) -> CoreResult<()> {
        self.inbox.delete_notification(id, user).await
    }
}

async fn run_cascade(cascade: MembershipCascade, job: Option<CascadeJob>) {
    let result = match job {
        None => return,
        Some(CascadeJob::Board(board, user)) => cascade.remove_member_traces(board, user).await,
        Some(CascadeJob::Workspace(workspace, user)) => cascade.remove_workspace_member_traces(workspace, user).await,
    };
    if let Err(e) = result {
        warn!(error = %e, "Membership cascade failed");
    }
}

async fn run_fanout(fanout: NotificationFanout, mutation: Option<Mutation>, actor: Actor) {
    if let Some(mutation) = mutation {
        fanout.create_for_mutation(&mutation, &actor).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NotificationKind;
    use crate::realtime::{ConnectionId, Identity};
    use crate::store::{InMemoryStore, NotificationStore};

    struct Fixture {
        store: Arc<InMemoryStore>,
        hub: Arc<RealtimeHub>,
        service: BoardService,
        owner: Actor,
        editor: Actor,
        board: Board,
        todo: List,
        done: List,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let service = BoardService::new(store.clone(), hub.clone(), ServiceConfig::default());
        let owner = Actor::new(UserId::new());
        let editor = Actor::new(UserId::new());

        let board = service.create_board(&owner, "Sprint", None).await.unwrap();
        let board = service.accept_invite(&editor, board.id).await.unwrap();
        let todo = service.create_list(&owner, board.id, "Todo").await.unwrap();
        let done = service.create_list(&owner, board.id, "Done").await.unwrap();

        Fixture {
            store,
            hub,
            service,
            owner,
            editor,
            board,
            todo,
            done,
        }
    }

    #[tokio::test]
    async fn test_rename_board_requires_owner() {
        let f = fixture().await;
        let err = f.service.rename_board(&f.editor, f.board.id, "Mine").await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden { .. }));

        let renamed = f.service.rename_board(&f.owner, f.board.id, "Sprint 2").await.unwrap();
        assert_eq!(renamed.title, "Sprint 2");
        let inbox = f.service.notifications_for(f.editor.id).await.unwrap();
        assert!(inbox.iter().any(|n| n.kind == NotificationKind::BoardRenamed));
    }

    #[tokio::test]
    async fn test_rename_list_resyncs_card_status() {
        let f = fixture().await;
        let a = f.service.create_card(&f.editor, f.todo.id, "A").await.unwrap();
        let b = f.service.create_card(&f.editor, f.done.id, "B").await.unwrap();

        f.service.rename_list(&f.owner, f.todo.id, "Backlog").await.unwrap();
        assert_eq!(f.store.card(a.id).await.unwrap().unwrap().status, "Backlog");
        assert_eq!(f.store.card(b.id).await.unwrap().unwrap().status, "Done");
    }

    #[tokio::test]
    async fn test_move_card_updates_status_and_rejects_foreign_lists() {
        let f = fixture().await;
        let card = f.service.create_card(&f.editor, f.todo.id, "A").await.unwrap();

        let moved = f.service.move_card(&f.editor, card.id, f.done.id).await.unwrap();
        assert_eq!(moved.list_id, f.done.id);
        assert_eq!(moved.status, "Done");

        let other = f.service.create_board(&f.owner, "Other", None).await.unwrap();
        let foreign = f.service.create_list(&f.owner, other.id, "Elsewhere").await.unwrap();
        let err = f.service.move_card(&f.editor, card.id, foreign.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_owner_cannot_be_removed_or_leave() {
        let f = fixture().await;
        let err = f
            .service
            .remove_board_member(&f.editor, f.board.id, f.owner.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        assert!(matches!(
            f.service.leave_board(&f.owner, f.board.id).await,
            Err(CoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_board_purges_traces_and_tells_the_rest() {
        let f = fixture().await;
        let card = f.service.create_card(&f.owner, f.todo.id, "A").await.unwrap();
        f.service.add_card_member(&f.owner, card.id, f.editor.id).await.unwrap();
        f.service.add_comment(&f.editor, card.id, "mine").await.unwrap();

        f.service.leave_board(&f.editor, f.board.id).await.unwrap();

        let card = f.store.card(card.id).await.unwrap().unwrap();
        assert!(!card.references(f.editor.id));
        let owner_inbox = f.service.notifications_for(f.owner.id).await.unwrap();
        assert!(owner_inbox.iter().any(|n| n.kind == NotificationKind::BoardMemberRemoved));
    }

    #[tokio::test]
    async fn test_add_card_member_requires_board_access() {
        let f = fixture().await;
        let card = f.service.create_card(&f.owner, f.todo.id, "A").await.unwrap();
        let err = f
            .service
            .add_card_member(&f.owner, card.id, UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let card = f.service.add_card_member(&f.owner, card.id, f.editor.id).await.unwrap();
        let again = f.service.add_card_member(&f.owner, card.id, f.editor.id).await.unwrap();
        assert_eq!(again.members, vec![f.editor.id]);
    }

    #[tokio::test]
    async fn test_only_author_removes_comment() {
        let f = fixture().await;
        let card = f.service.create_card(&f.owner, f.todo.id, "A").await.unwrap();
        let card = f.service.add_comment(&f.editor, card.id, "hello").await.unwrap();
        let comment = card.comments[0].id;

        assert!(matches!(
            f.service.remove_comment(&f.owner, card.id, comment).await,
            Err(CoreError::Forbidden { .. })
        ));
        let card = f.service.remove_comment(&f.editor, card.id, comment).await.unwrap();
        assert!(card.comments.is_empty());
    }

    #[tokio::test]
    async fn test_reorder_lists_rewrites_positions() {
        let f = fixture().await;
        let lists = f
            .service
            .reorder_lists(&f.editor, f.board.id, &[f.done.id, f.todo.id])
            .await
            .unwrap();
        assert_eq!(lists.iter().map(|l| l.position).collect::<Vec<_>>(), vec![0, 1]);

        let stored = f.store.lists_in_board(f.board.id).await.unwrap();
        assert_eq!(stored.iter().map(|l| l.id).collect::<Vec<_>>(), vec![f.done.id, f.todo.id]);

        for bad in [vec![f.done.id], vec![f.done.id, f.done.id], vec![f.done.id, f.todo.id, ListId::new()]] {
            let err = f.service.reorder_lists(&f.owner, f.board.id, &bad).await.unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
        let outsider = Actor::new(UserId::new());
        assert!(matches!(
            f.service.reorder_lists(&outsider, f.board.id, &[f.todo.id, f.done.id]).await,
            Err(CoreError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_reorder_cards_is_broadcast() {
        let f = fixture().await;
        let a = f.service.create_card(&f.owner, f.todo.id, "A").await.unwrap();
        let b = f.service.create_card(&f.owner, f.todo.id, "B").await.unwrap();
        let conn = ConnectionId::new("owner");
        f.hub.connect(conn.clone(), Identity::new(f.owner.id, None)).unwrap();
        let mut sub = f.hub.join(&conn, f.board.id).await.unwrap();

        let cards = f.service.reorder_cards(&f.editor, f.todo.id, &[b.id, a.id]).await.unwrap();
        assert_eq!(cards[0].id, b.id);
        assert_eq!(cards[0].position, 0);
        let stored = f.store.cards_in_list(f.todo.id).await.unwrap();
        assert_eq!(stored.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b.id, a.id]);

        let event = sub.try_recv().unwrap();
        assert_eq!(event.event, EventName::CardReordered);
        assert_eq!(event.payload["updatedBy"]["id"], f.editor.id.to_string());

        let err = f.service.reorder_cards(&f.editor, f.done.id, &[a.id]).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_list_deletes_its_cards() {
        let f = fixture().await;
        let card = f.service.create_card(&f.owner, f.todo.id, "A").await.unwrap();
        f.service.delete_list(&f.editor, f.todo.id).await.unwrap();
        assert!(f.store.card(card.id).await.unwrap().is_none());
        assert!(f.store.list(f.todo.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutation_is_broadcast_to_others_only() {
        let f = fixture().await;
        let owner_conn = ConnectionId::new("owner");
        let editor_conn = ConnectionId::new("editor");
        f.hub.connect(owner_conn.clone(), Identity::new(f.owner.id, None)).unwrap();
        f.hub.connect(editor_conn.clone(), Identity::new(f.editor.id, None)).unwrap();
        let mut owner_sub = f.hub.join(&owner_conn, f.board.id).await.unwrap();
        let mut editor_sub = f.hub.join(&editor_conn, f.board.id).await.unwrap();

        f.service.create_card(&f.editor, f.todo.id, "A").await.unwrap();

        let event = owner_sub.try_recv().unwrap();
        assert_eq!(event.event, EventName::CardCreated);
        assert_eq!(event.payload["createdBy"]["id"], f.editor.id.to_string());
        assert!(editor_sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_detached_dispatch_still_writes_notifications() {
        let store = Arc::new(InMemoryStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let service = BoardService::new(
            store.clone(),
            hub,
            ServiceConfig {
                dispatch: Dispatch::Detached,
                cascade: CascadePolicy::default(),
            },
        );
        let owner = Actor::new(UserId::new());
        let member = Actor::new(UserId::new());
        let board = service.create_board(&owner, "Ops", None).await.unwrap();
        service.accept_invite(&member, board.id).await.unwrap();

        for _ in 0..50 {
            if !store.notifications_for(owner.id).await.unwrap().is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("detached fan-out never wrote a notification");
    }
}
