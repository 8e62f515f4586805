//! Recipient computation and notification writes for committed mutations.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::ids::UserId;
use crate::model::{Actor, Board, Card, List, Notification, NotificationKind, Related, Workspace};
use crate::store::NotificationStore;

/// How a member left a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed by another user.
    Removed,
    /// Left on their own.
    Left,
}

/// A committed mutation that produces notifications.
///
/// Snapshots are taken after the write unless noted.
#[derive(Debug, Clone)]
pub enum Mutation {
    BoardRenamed { board: Board },
    BoardMemberAdded { board: Board, added: UserId },
    BoardMemberRemoved { board: Board, removed: UserId, cause: RemovalCause },
    /// Snapshot taken before the delete.
    BoardDeleted { board: Board },
    ListCreated { board: Board, list: List },
    ListRenamed { board: Board, list: List, previous_title: String },
    /// Snapshot taken before the delete.
    ListDeleted { board: Board, list: List },
    CardMoved { card: Card, from: List, to: List },
    CardMemberAdded { card: Card, added: UserId },
    CardRenamed { card: Card, previous_title: String },
    /// Snapshot taken before the delete.
    CardDeleted { card: Card },
    WorkspaceMemberAdded { before: Workspace, after: Workspace, member: UserId },
    WorkspaceMemberRemoved { before: Workspace, after: Workspace, member: UserId },
    /// Snapshot taken before the delete.
    WorkspaceDeleted { workspace: Workspace },
}

impl Mutation {
    #[must_use]
    pub fn kind(&self) -> NotificationKind {
        match self {
            Mutation::BoardRenamed { .. } => NotificationKind::BoardRenamed,
            Mutation::BoardMemberAdded { .. } => NotificationKind::BoardMemberAdded,
            Mutation::BoardMemberRemoved { .. } => NotificationKind::BoardMemberRemoved,
            Mutation::BoardDeleted { .. } => NotificationKind::BoardDeleted,
            Mutation::ListCreated { .. } => NotificationKind::ListCreated,
            Mutation::ListRenamed { .. } => NotificationKind::ListRenamed,
            Mutation::ListDeleted { .. } => NotificationKind::ListDeleted,
            Mutation::CardMoved { .. } => NotificationKind::CardMoved,
            Mutation::CardMemberAdded { .. } => NotificationKind::CardMemberAdded,
            Mutation::CardRenamed { .. } => NotificationKind::CardRenamed,
            Mutation::CardDeleted { .. } => NotificationKind::CardDeleted,
            Mutation::WorkspaceMemberAdded { .. } => NotificationKind::WorkspaceMemberAdded,
            Mutation::WorkspaceMemberRemoved { .. } => NotificationKind::WorkspaceMemberRemoved,
            Mutation::WorkspaceDeleted { .. } => NotificationKind::WorkspaceDeleted,
        }
    }

    /// Candidate recipients before actor exclusion and de-duplication.
    #[must_use]
    pub fn candidates(&self) -> Vec<UserId> {
        match self {
            Mutation::BoardRenamed { board } | Mutation::BoardDeleted { board } => board.members.clone(),
            Mutation::BoardMemberAdded { board, added } => board
                .members
                .iter()
                .copied()
                .filter(|m| m != added)
                .chain(std::iter::once(board.owner))
                .collect(),
            Mutation::BoardMemberRemoved { board, removed, cause } => {
                let mut out: Vec<UserId> = board.members.iter().copied().filter(|m| m != removed).collect();
                out.push(board.owner);
                if *cause == RemovalCause::Removed {
                    out.push(*removed);
                }
                out
            }
            Mutation::ListCreated { board, .. }
            | Mutation::ListRenamed { board, .. }
            | Mutation::ListDeleted { board, .. } => {
                let mut out = board.members.clone();
                out.push(board.owner);
                out
            }
            Mutation::CardMoved { card, .. } | Mutation::CardDeleted { card } => {
                let mut out = card.members.clone();
                out.push(card.created_by);
                out
            }
            Mutation::CardMemberAdded { card, added } => std::iter::once(*added)
                .chain(card.members.iter().copied())
                .collect(),
            Mutation::CardRenamed { card, .. } => card.members.clone(),
            Mutation::WorkspaceMemberAdded { before, after, member }
            | Mutation::WorkspaceMemberRemoved { before, after, member } => before
                .members
                .iter()
                .chain(after.members.iter())
                .copied()
                .chain(std::iter::once(*member))
                .collect(),
            Mutation::WorkspaceDeleted { workspace } => workspace.members.clone(),
        }
    }

    #[must_use]
    pub fn related(&self) -> Related {
        match self {
            Mutation::BoardRenamed { board }
            | Mutation::BoardMemberAdded { board, .. }
            | Mutation::BoardMemberRemoved { board, .. }
            | Mutation::BoardDeleted { board } => Related {
                workspace: board.workspace,
                board: Some(board.id),
                ..Related::default()
            },
            Mutation::ListCreated { board, list }
            | Mutation::ListRenamed { board, list, .. }
            | Mutation::ListDeleted { board, list } => Related {
                workspace: board.workspace,
                board: Some(board.id),
                list: Some(list.id),
                card: None,
            },
            Mutation::CardMoved { card, .. }
            | Mutation::CardMemberAdded { card, .. }
            | Mutation::CardRenamed { card, .. }
            | Mutation::CardDeleted { card } => Related {
                workspace: None,
                board: Some(card.board_id),
                list: Some(card.list_id),
                card: Some(card.id),
            },
            Mutation::WorkspaceMemberAdded { after, .. } | Mutation::WorkspaceMemberRemoved { after, .. } => {
                Related {
                    workspace: Some(after.id),
                    ..Related::default()
                }
            }
            Mutation::WorkspaceDeleted { workspace } => Related {
                workspace: Some(workspace.id),
                ..Related::default()
            },
        }
    }

    /// Message text for one recipient.
    #[must_use]
    pub fn message(&self, actor: &Actor, recipient: UserId) -> String {
        let who = actor.display_name();
        match self {
            Mutation::BoardRenamed { board } => format!("{who} renamed board to \"{}\"", board.title),
            Mutation::BoardMemberAdded { board, .. } => {
                format!("{who} joined board \"{}\"", board.title)
            }
            Mutation::BoardMemberRemoved { board, removed, cause } => match cause {
                RemovalCause::Removed if *removed == recipient => {
                    format!("{who} removed you from board \"{}\"", board.title)
                }
                RemovalCause::Removed => format!("{who} removed a member from board \"{}\"", board.title),
                RemovalCause::Left => format!("{who} left board \"{}\"", board.title),
            },
            Mutation::BoardDeleted { board } => format!("{who} deleted board \"{}\"", board.title),
            Mutation::ListCreated { board, list } => {
                format!("{who} created list \"{}\" on board \"{}\"", list.title, board.title)
            }
            Mutation::ListRenamed { list, previous_title, .. } => {
                format!("{who} renamed list \"{previous_title}\" to \"{}\"", list.title)
            }
            Mutation::ListDeleted { board, list } => {
                format!("{who} deleted list \"{}\" from board \"{}\"", list.title, board.title)
            }
            Mutation::CardMoved { card, from, to } => {
                format!("{who} moved card \"{}\" from \"{}\" to \"{}\"", card.title, from.title, to.title)
            }
            Mutation::CardMemberAdded { card, added } if *added == recipient => {
                format!("{who} assigned you to card \"{}\"", card.title)
            }
            Mutation::CardMemberAdded { card, .. } => {
                format!("{who} added a member to card \"{}\"", card.title)
            }
            Mutation::CardRenamed { card, previous_title } => {
                format!("{who} renamed card \"{previous_title}\" to \"{}\"", card.title)
            }
            Mutation::CardDeleted { card } => format!("{who} deleted card \"{}\"", card.title),
            Mutation::WorkspaceMemberAdded { after, member, .. } if *member == recipient => {
                format!("{who} added you to workspace \"{}\"", after.name)
            }
            Mutation::WorkspaceMemberAdded { after, .. } => {
                format!("{who} added a member to workspace \"{}\"", after.name)
            }
            Mutation::WorkspaceMemberRemoved { after, member, .. } if *member == recipient => {
                format!("{who} removed you from workspace \"{}\"", after.name)
            }
            Mutation::WorkspaceMemberRemoved { after, .. } => {
                format!("{who} removed a member from workspace \"{}\"", after.name)
            }
            Mutation::WorkspaceDeleted { workspace } => {
                format!("{who} deleted workspace \"{}\"", workspace.name)
            }
        }
    }
}

/// Drop the actor and duplicates, keeping first-seen order.
#[must_use]
pub fn recipients_for(candidates: impl IntoIterator<Item = UserId>, actor: UserId) -> Vec<UserId> {
    let mut out: Vec<UserId> = Vec::new();
    for user in candidates {
        if user != actor && !out.contains(&user) {
            out.push(user);
        }
    }
    out
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub kind: NotificationKind,
    pub recipients: Vec<UserId>,
    pub created: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationFanout {
    store: Arc<dyn NotificationStore>,
}

impl NotificationFanout {
    #[must_use]
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Write one notification per recipient. A failed write is logged and
    /// counted; it never stops the remaining writes.
    pub async fn create_for_mutation(&self, mutation: &Mutation, actor: &Actor) -> FanoutReport {
        let kind = mutation.kind();
        let recipients = recipients_for(mutation.candidates(), actor.id);
        let related = mutation.related();

        let mut created = 0;
        let mut failed = 0;
        for recipient in &recipients {
            let notification = Notification::new(
                *recipient,
                Some(actor.id),
                kind,
                mutation.message(actor, *recipient),
                related.clone(),
            );
            match self.store.insert_notification(notification).await {
                Ok(()) => created += 1,
                Err(e) => {
                    failed += 1;
                    warn!(kind = ?kind, recipient = %recipient, error = %e, "Failed to write notification");
                }
            }
        }

        debug!(kind = ?kind, actor = %actor.id, created, failed, "Notification fan-out complete");
        FanoutReport {
            kind,
            recipients,
            created,
            failed,
        }
    }
}
