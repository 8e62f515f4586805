//! Board role resolution.
//!
//! A user's role on a board is derived with strict precedence, first match
//! wins:
//!
//! 1. `Owner` if the user owns the board.
//! 2. `Editor` if the user is an explicit board member.
//! 3. `Editor` if the board belongs to a workspace the user owns or is a member of.
//! 4. `None` otherwise.
//!
//! Entry points taking a list or card id follow the stored `board_id` of the
//! target, so every path yields the same role for the same board/user pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::ids::{BoardId, CardId, ListId, UserId};
use crate::model::{Board, Card, List, Workspace};
use crate::store::BoardStore;

/// Computed access level, totally ordered `None < Viewer < Editor < Owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    None,
    Viewer,
    Editor,
    Owner,
}

impl Role {
    #[must_use]
    pub fn at_least(self, min: Role) -> bool {
        self >= min
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which precedence rule granted the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Ownership,
    BoardMembership,
    WorkspaceMembership,
}

/// Result of resolving a user against a board.
#[derive(Debug, Clone)]
pub struct Access {
    pub has_access: bool,
    pub role: Role,
    pub board: Board,
    pub grant: Option<Grant>,
    /// Human-readable explanation when access is denied.
    pub reason: Option<String>,
}

impl Access {
    /// Turn an insufficient role into `Forbidden`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Forbidden` carrying the denial reason.
    pub fn require(self, min: Role) -> CoreResult<Self> {
        if self.role.at_least(min) {
            return Ok(self);
        }
        let reason = match &self.reason {
            Some(reason) => reason.clone(),
            None => format!(
                "{} access required on board {}, caller is {}",
                min, self.board.id, self.role
            ),
        };
        Err(CoreError::Forbidden { reason })
    }
}

/// Pure role computation over already-loaded documents.
///
/// `workspace` must be the document referenced by `board.workspace`, if it
/// still exists.
#[must_use]
pub fn role_for(board: &Board, workspace: Option<&Workspace>, user: UserId) -> (Role, Option<Grant>) {
    if board.owner == user {
        return (Role::Owner, Some(Grant::Ownership));
    }
    if board.is_member(user) {
        return (Role::Editor, Some(Grant::BoardMembership));
    }
    match (board.workspace, workspace) {
        (Some(ws_id), Some(ws)) if ws.id == ws_id && ws.includes(user) => {
            (Role::Editor, Some(Grant::WorkspaceMembership))
        }
        _ => (Role::None, None),
    }
}

/// Resolves roles against the store.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn BoardStore>,
}

impl RoleResolver {
    #[must_use]
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    /// Resolve by board id string.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed id, `NotFound` if the board does not exist.
    pub async fn resolve(&self, board_id: &str, user: UserId) -> CoreResult<Access> {
        let board_id = BoardId::parse(board_id)?;
        self.board_access(board_id, user).await
    }

    /// Resolve through a list id string.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed id, `NotFound` if the list or its board
    /// does not exist.
    pub async fn resolve_via_list(&self, list_id: &str, user: UserId) -> CoreResult<Access> {
        let list_id = ListId::parse(list_id)?;
        self.list_access(list_id, user).await.map(|(access, _)| access)
    }

    /// Resolve through a card id string.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed id, `NotFound` if the card or its board
    /// does not exist.
    pub async fn resolve_via_card(&self, card_id: &str, user: UserId) -> CoreResult<Access> {
        let card_id = CardId::parse(card_id)?;
        self.card_access(card_id, user).await.map(|(access, _)| access)
    }

    /// Resolve by typed board id.
    ///
    /// # Errors
    ///
    /// `NotFound` if the board does not exist.
    pub async fn board_access(&self, board_id: BoardId, user: UserId) -> CoreResult<Access> {
        let board = self
            .store
            .board(board_id)
            .await?
            .ok_or_else(|| CoreError::not_found("board", board_id))?;
        self.access_to(board, user).await
    }

    /// Resolve through a list, returning the list as well.
    ///
    /// # Errors
    ///
    /// `NotFound` if the list or its board does not exist.
    pub async fn list_access(&self, list_id: ListId, user: UserId) -> CoreResult<(Access, List)> {
        let list = self
            .store
            .list(list_id)
            .await?
            .ok_or_else(|| CoreError::not_found("list", list_id))?;
        let access = self.board_access(list.board_id, user).await?;
        Ok((access, list))
    }

    /// Resolve through a card, returning the card as well.
    ///
    /// # Errors
    ///
    /// `NotFound` if the card or its board does not exist.
    pub async fn card_access(&self, card_id: CardId, user: UserId) -> CoreResult<(Access, Card)> {
        let card = self
            .store
            .card(card_id)
            .await?
            .ok_or_else(|| CoreError::not_found("card", card_id))?;
        let access = self.board_access(card.board_id, user).await?;
        Ok((access, card))
    }

    /// Resolve against an already-loaded board.
    ///
    /// # Errors
    ///
    /// Propagates store failures while loading the workspace.
    pub async fn access_to(&self, board: Board, user: UserId) -> CoreResult<Access> {
        // Owner and explicit members never need the workspace document.
        let workspace = if board.owner != user && !board.is_member(user) {
            match board.workspace {
                Some(ws_id) => {
                    let ws = self.store.workspace(ws_id).await?;
                    if ws.is_none() {
                        debug!(board = %board.id, workspace = %ws_id, "Board references a missing workspace");
                    }
                    ws
                }
                None => None,
            }
        } else {
            None
        };

        let (role, grant) = role_for(&board, workspace.as_ref(), user);
        trace!(board = %board.id, user = %user, role = %role, "Resolved role");

        let reason = (role == Role::None).then(|| {
            format!("user {} is not the owner or a member of board {}", user, board.id)
        });

        Ok(Access {
            has_access: role != Role::None,
            role,
            board,
            grant,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Card;
    use crate::store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        resolver: RoleResolver,
        owner: UserId,
        member: UserId,
        workspace_member: UserId,
        board: Board,
        list: List,
        card: Card,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let owner = UserId::new();
        let member = UserId::new();
        let workspace_member = UserId::new();

        let mut ws = Workspace::new("Acme", owner);
        ws.members.push(workspace_member);
        store.insert_workspace(ws.clone()).await.unwrap();

        let mut board = Board::new("Launch", owner, Some(ws.id));
        board.members.push(member);
        store.insert_board(board.clone()).await.unwrap();

        let list = List::new(board.id, "Todo", 0);
        store.insert_list(list.clone()).await.unwrap();
        let card = Card::new(&list, "Plan", owner, 0);
        store.insert_card(card.clone()).await.unwrap();

        Fixture {
            resolver: RoleResolver::new(store.clone()),
            store,
            owner,
            member,
            workspace_member,
            board,
            list,
            card,
        }
    }

    #[test]
    fn test_role_total_order() {
        assert!(Role::Owner > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
        assert!(Role::Viewer > Role::None);
        assert!(Role::Owner.at_least(Role::Editor));
        assert!(!Role::Viewer.at_least(Role::Editor));
        assert_eq!(serde_json::to_value(Role::Editor).unwrap(), "editor");
    }

    #[test]
    fn test_owner_wins_over_membership() {
        let owner = UserId::new();
        let board = Board::new("B", owner, None);
        assert!(board.is_member(owner));
        assert_eq!(role_for(&board, None, owner), (Role::Owner, Some(Grant::Ownership)));
    }

    #[test]
    fn test_mismatched_workspace_grants_nothing() {
        let user = UserId::new();
        let board = Board::new("B", UserId::new(), Some(crate::ids::WorkspaceId::new()));
        let mut other = Workspace::new("Other", UserId::new());
        other.members.push(user);
        assert_eq!(role_for(&board, Some(&other), user).0, Role::None);
    }

    #[tokio::test]
    async fn test_precedence() {
        let f = fixture().await;
        let id = f.board.id.to_string();

        assert_eq!(f.resolver.resolve(&id, f.owner).await.unwrap().role, Role::Owner);
        assert_eq!(f.resolver.resolve(&id, f.member).await.unwrap().role, Role::Editor);

        let ws = f.resolver.resolve(&id, f.workspace_member).await.unwrap();
        assert!(ws.has_access);
        assert_eq!(ws.role, Role::Editor);
        assert_eq!(ws.grant, Some(Grant::WorkspaceMembership));

        let stranger = f.resolver.resolve(&id, UserId::new()).await.unwrap();
        assert!(!stranger.has_access);
        assert_eq!(stranger.role, Role::None);
        assert!(stranger.reason.is_some());
    }

    #[tokio::test]
    async fn test_all_entry_points_agree() {
        let f = fixture().await;
        for user in [f.owner, f.member, f.workspace_member, UserId::new()] {
            let direct = f.resolver.resolve(&f.board.id.to_string(), user).await.unwrap();
            let via_list = f.resolver.resolve_via_list(&f.list.id.to_string(), user).await.unwrap();
            let via_card = f.resolver.resolve_via_card(&f.card.id.to_string(), user).await.unwrap();
            assert_eq!(direct.role, via_list.role);
            assert_eq!(direct.role, via_card.role);
            assert_eq!(direct.board.id, via_card.board.id);
        }
    }

    #[tokio::test]
    async fn test_malformed_and_missing_ids() {
        let f = fixture().await;
        assert!(matches!(
            f.resolver.resolve("nope", f.owner).await,
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            f.resolver.resolve_via_card(&CardId::new().to_string(), f.owner).await,
            Err(CoreError::NotFound { entity: "card", .. })
        ));
    }

    #[tokio::test]
    async fn test_orphaned_card_is_not_found() {
        let f = fixture().await;
        f.store.delete_board_cascade(f.board.id).await.unwrap();
        // Re-insert the card alone so its board no longer resolves.
        f.store.insert_card(f.card.clone()).await.unwrap();
        assert!(matches!(
            f.resolver.resolve_via_card(&f.card.id.to_string(), f.owner).await,
            Err(CoreError::NotFound { entity: "board", .. })
        ));
    }

    #[tokio::test]
    async fn test_require_maps_to_forbidden() {
        let f = fixture().await;
        let access = f.resolver.board_access(f.board.id, f.member).await.unwrap();
        match access.require(Role::Owner) {
            Err(CoreError::Forbidden { reason }) => assert!(reason.contains("owner")),
            other => panic!("Expected forbidden, got {:?}", other),
        }

        let stranger = f.resolver.board_access(f.board.id, UserId::new()).await.unwrap();
        assert!(matches!(
            stranger.require(Role::Viewer),
            Err(CoreError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn test_dangling_workspace_grants_nothing() {
        let f = fixture().await;
        let ws = f.board.workspace.unwrap();
        f.store.delete_workspace(ws).await.unwrap();
        let access = f.resolver.board_access(f.board.id, f.workspace_member).await.unwrap();
        assert_eq!(access.role, Role::None);
        // Explicit members are unaffected.
        let access = f.resolver.board_access(f.board.id, f.member).await.unwrap();
        assert_eq!(access.role, Role::Editor);
    }
}
