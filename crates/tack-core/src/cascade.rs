//! Purge a departed member's traces from a board's cards.
//!
//! Removing the user from `board.members` is the caller's job and happens
//! first. The three purges are independent, unordered and idempotent; a
//! second run modifies nothing.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::ids::{BoardId, UserId, WorkspaceId};
use crate::store::BoardStore;

/// What a cascade removes besides assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePolicy {
    /// Delete the member's comments and activity entries. When `false` only
    /// card assignments are removed.
    pub purge_history: bool,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self { purge_history: true }
    }
}

/// Documents modified by one cascade run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub cards_unassigned: u64,
    pub cards_with_comments_removed: u64,
    pub cards_with_activities_removed: u64,
}

impl CascadeReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.cards_unassigned + self.cards_with_comments_removed + self.cards_with_activities_removed
    }

    fn merge(&mut self, other: CascadeReport) {
        self.cards_unassigned += other.cards_unassigned;
        self.cards_with_comments_removed += other.cards_with_comments_removed;
        self.cards_with_activities_removed += other.cards_with_activities_removed;
    }
}

#[derive(Clone)]
pub struct MembershipCascade {
    store: Arc<dyn BoardStore>,
    policy: CascadePolicy,
}

impl MembershipCascade {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self::with_policy(store, CascadePolicy::default())
    }

    #[must_use]
    pub fn with_policy(store: Arc<dyn BoardStore>, policy: CascadePolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> CascadePolicy {
        self.policy
    }

    /// Remove `user` from the assignees of every card in `board`, and unless
    /// the policy keeps history, their comments and activity entries.
    ///
    /// The batches run concurrently. If one fails the others still complete;
    /// the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first store error among the batches.
    pub async fn remove_member_traces(&self, board: BoardId, user: UserId) -> CoreResult<CascadeReport> {
        let store = &self.store;
        let report = if self.policy.purge_history {
            let (unassigned, comments, activities) = tokio::join!(
                store.pull_card_member_in_board(board, user),
                store.pull_comments_by_author_in_board(board, user),
                store.pull_activities_by_author_in_board(board, user),
            );
            CascadeReport {
                cards_unassigned: unassigned?,
                cards_with_comments_removed: comments?,
                cards_with_activities_removed: activities?,
            }
        } else {
            CascadeReport {
                cards_unassigned: store.pull_card_member_in_board(board, user).await?,
                ..CascadeReport::default()
            }
        };

        debug!(
            board = %board,
            user = %user,
            unassigned = report.cards_unassigned,
            comments = report.cards_with_comments_removed,
            activities = report.cards_with_activities_removed,
            "Membership cascade complete"
        );
        Ok(report)
    }

    /// Cascade for loss of workspace-derived access: every board in the
    /// workspace where the user is neither owner nor an explicit member.
    /// A failing board is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the workspace's boards cannot be listed.
    pub async fn remove_workspace_member_traces(
        &self,
        workspace: WorkspaceId,
        user: UserId,
    ) -> CoreResult<CascadeReport> {
        let boards = self.store.boards_in_workspace(workspace).await?;
        let mut report = CascadeReport::default();
        for board in boards
            .iter()
            .filter(|b| b.owner != user && !b.is_member(user))
        {
            match self.remove_member_traces(board.id, user).await {
                Ok(r) => report.merge(r),
                Err(e) => warn!(board = %board.id, user = %user, error = %e, "Workspace cascade failed for board"),
            }
        }
        Ok(report)
    }
}
