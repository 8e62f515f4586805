//! Shared fixtures for the Tack benchmarks.

use std::sync::Arc;
use tack_core::{
    Actor, Board, BoardId, BoardStore, Card, ConnectionId, Identity, InMemoryStore, List,
    RealtimeHub, Subscription, UserId, Workspace,
};
use tack_protocol::{BroadcastPayload, EntityKey, EventName};

/// A board room with `participants` channels, each belonging to its own user.
///
/// The subscriptions are returned so the room stays populated.
pub async fn populated_room(participants: usize) -> (RealtimeHub, BoardId, Vec<Subscription>) {
    let hub = RealtimeHub::new();
    let board = BoardId::new();
    let mut subscriptions = Vec::with_capacity(participants);
    for i in 0..participants {
        let conn = ConnectionId::new(format!("conn-{i}"));
        hub.connect(conn.clone(), Identity::new(UserId::new(), None))
            .expect("fresh connection id");
        subscriptions.push(hub.join(&conn, board).await.expect("open room"));
    }
    (hub, board, subscriptions)
}

/// A `card:updated` payload of roughly realistic size.
#[must_use]
pub fn card_payload(actor: &Actor) -> BroadcastPayload {
    BroadcastPayload::for_event(
        EventName::CardUpdated,
        EntityKey::Card,
        serde_json::json!({
            "id": "6f1c7a52-5d1e-4a57-9d0f-2a8e3c1b9f10",
            "title": "Rotate signing keys",
            "status": "In Progress",
            "labels": ["security", "ops"],
        }),
        actor.actor_ref(),
    )
}

/// Ids reachable through every resolution path.
pub struct Seeded {
    pub store: Arc<InMemoryStore>,
    pub board: Board,
    pub list: List,
    pub card: Card,
    /// Explicit board member.
    pub member: UserId,
    /// Reaches the board only through its workspace.
    pub workspace_member: UserId,
    pub outsider: UserId,
}

pub async fn seeded_store() -> Seeded {
    let store = Arc::new(InMemoryStore::new());
    let owner = UserId::new();
    let member = UserId::new();
    let workspace_member = UserId::new();

    let mut workspace = Workspace::new("Acme", owner);
    workspace.members.push(workspace_member);
    let mut board = Board::new("Platform", owner, Some(workspace.id));
    board.members.push(member);
    let list = List::new(board.id, "Todo", 0);
    let card = Card::new(&list, "Upgrade runtime", owner, 0);

    store.insert_workspace(workspace).await.expect("insert workspace");
    store.insert_board(board.clone()).await.expect("insert board");
    store.insert_list(list.clone()).await.expect("insert list");
    store.insert_card(card.clone()).await.expect("insert card");

    Seeded {
        store,
        board,
        list,
        card,
        member,
        workspace_member,
        outsider: UserId::new(),
    }
}
