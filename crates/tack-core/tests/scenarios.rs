//! End-to-end flows through the board service against the in-memory store.

use std::sync::Arc;

use tack_core::{
    Actor, Board, BoardService, BoardStore, Card, ConnectionId, HubConfig, Identity, InMemoryStore,
    List, Mutation, NotificationFanout, NotificationKind, NotificationStore, RealtimeHub, Role,
    ServiceConfig, UserId, Workspace,
};
use tack_protocol::EventName;

struct World {
    store: Arc<InMemoryStore>,
    hub: Arc<RealtimeHub>,
    service: BoardService,
}

fn world() -> World {
    let store = Arc::new(InMemoryStore::new());
    let hub = Arc::new(RealtimeHub::with_config(HubConfig::default()));
    let service = BoardService::new(store.clone(), hub.clone(), ServiceConfig::default());
    World { store, hub, service }
}

async fn kinds_for(store: &InMemoryStore, user: UserId) -> Vec<NotificationKind> {
    store
        .notifications_for(user)
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.kind)
        .collect()
}

#[tokio::test]
async fn scenario_a_removed_member_is_purged_and_notified() {
    let w = world();
    let owner = Actor::new(UserId::new());
    let m1 = Actor::new(UserId::new());
    let m2 = Actor::new(UserId::new());

    let board = w.service.create_board(&owner, "Release", None).await.unwrap();
    w.service.accept_invite(&m1, board.id).await.unwrap();
    w.service.accept_invite(&m2, board.id).await.unwrap();
    let todo = w.service.create_list(&owner, board.id, "Todo").await.unwrap();
    let doing = w.service.create_list(&owner, board.id, "Doing").await.unwrap();

    let mut cards = Vec::new();
    for title in ["One", "Two", "Three"] {
        let card = w.service.create_card(&owner, todo.id, title).await.unwrap();
        w.service.add_card_member(&owner, card.id, m2.id).await.unwrap();
        w.service.add_comment(&m2, card.id, "taking this").await.unwrap();
        w.service.move_card(&m2, card.id, doing.id).await.unwrap();
        cards.push(card.id);
    }
    let before_m1 = w.store.notifications_for(m1.id).await.unwrap().len();

    let board = w.service.remove_board_member(&m1, board.id, m2.id).await.unwrap();
    assert!(!board.is_member(m2.id));

    for id in cards {
        let card = w.store.card(id).await.unwrap().unwrap();
        assert!(!card.members.contains(&m2.id));
        assert!(card.comments.iter().all(|c| c.author != m2.id));
        assert!(card.activities.iter().all(|a| a.author != m2.id));
    }

    let removals = |kinds: Vec<NotificationKind>| {
        kinds
            .into_iter()
            .filter(|k| *k == NotificationKind::BoardMemberRemoved)
            .count()
    };
    assert_eq!(removals(kinds_for(&w.store, owner.id).await), 1);
    assert_eq!(removals(kinds_for(&w.store, m2.id).await), 1);
    assert_eq!(w.store.notifications_for(m1.id).await.unwrap().len(), before_m1);
}

#[tokio::test]
async fn scenario_b_workspace_member_resolves_as_editor() {
    let w = world();
    let owner = UserId::new();
    let u = UserId::new();
    let mut workspace = Workspace::new("Acme", owner);
    workspace.members.push(u);
    w.store.insert_workspace(workspace.clone()).await.unwrap();
    let board = Board::new("Planning", owner, Some(workspace.id));
    w.store.insert_board(board.clone()).await.unwrap();

    let access = w.service.resolver().resolve(&board.id.to_string(), u).await.unwrap();
    assert!(access.has_access);
    assert_eq!(access.role, Role::Editor);
    assert!(!access.board.is_member(u));
}

#[tokio::test]
async fn scenario_c_list_rename_resyncs_status_of_its_cards_only() {
    let w = world();
    let owner = Actor::new(UserId::new());
    let board = w.service.create_board(&owner, "Delivery", None).await.unwrap();
    let todo = w.service.create_list(&owner, board.id, "Todo").await.unwrap();
    let done = w.service.create_list(&owner, board.id, "Done").await.unwrap();

    for i in 0..30 {
        w.service.create_card(&owner, todo.id, &format!("Task {i}")).await.unwrap();
    }
    for i in 0..5 {
        w.service.create_card(&owner, done.id, &format!("Shipped {i}")).await.unwrap();
    }

    w.service.rename_list(&owner, todo.id, "In Progress").await.unwrap();

    let renamed = w.store.cards_in_list(todo.id).await.unwrap();
    assert_eq!(renamed.len(), 30);
    assert!(renamed.iter().all(|c| c.status == "In Progress"));
    let untouched = w.store.cards_in_list(done.id).await.unwrap();
    assert!(untouched.iter().all(|c| c.status == "Done"));
}

#[tokio::test]
async fn scenario_d_concurrent_fanout_is_at_least_once() {
    let store = Arc::new(InMemoryStore::new());
    let fanout = NotificationFanout::new(store.clone());
    let mover = Actor::new(UserId::new());
    let (creator, assignee) = (UserId::new(), UserId::new());

    let board = Board::new("Board", creator, None);
    let from = List::new(board.id, "Todo", 0);
    let to = List::new(board.id, "Done", 1);
    let mut card = Card::new(&to, "Deploy", creator, 0);
    card.members = vec![assignee];
    let mutation = Mutation::CardMoved { card, from, to };

    let (first, second) = tokio::join!(
        fanout.create_for_mutation(&mutation, &mover),
        fanout.create_for_mutation(&mutation, &mover),
    );
    assert_eq!(first.recipients, vec![assignee, creator]);
    assert_eq!(first.recipients, second.recipients);
    assert_eq!(first.created + second.created, 4);
    assert_eq!(store.notifications_for(assignee).await.unwrap().len(), 2);
    assert_eq!(store.notifications_for(creator).await.unwrap().len(), 2);
}

#[tokio::test]
async fn removing_workspace_member_purges_derived_board_traces() {
    let w = world();
    let owner = Actor::new(UserId::new());
    let u = Actor::new(UserId::new());
    let workspace = Workspace::new("Acme", owner.id);
    w.store.insert_workspace(workspace.clone()).await.unwrap();
    w.service.add_workspace_member(&owner, workspace.id, u.id).await.unwrap();

    let board = w.service.create_board(&owner, "Infra", Some(workspace.id)).await.unwrap();
    let list = w.service.create_list(&u, board.id, "Todo").await.unwrap();
    let card = w.service.create_card(&owner, list.id, "Rotate keys").await.unwrap();
    w.service.add_card_member(&owner, card.id, u.id).await.unwrap();
    w.service.add_comment(&u, card.id, "on it").await.unwrap();

    w.service.remove_workspace_member(&owner, workspace.id, u.id).await.unwrap();

    let card = w.store.card(card.id).await.unwrap().unwrap();
    assert!(!card.references(u.id));
    let access = w.service.resolver().board_access(board.id, u.id).await.unwrap();
    assert_eq!(access.role, Role::None);
    assert!(kinds_for(&w.store, u.id)
        .await
        .contains(&NotificationKind::WorkspaceMemberRemoved));
}

#[tokio::test]
async fn deleted_workspace_grants_nothing_but_boards_survive() {
    let w = world();
    let owner = Actor::new(UserId::new());
    let u = Actor::new(UserId::new());
    let workspace = Workspace::new("Acme", owner.id);
    w.store.insert_workspace(workspace.clone()).await.unwrap();
    w.service.add_workspace_member(&owner, workspace.id, u.id).await.unwrap();
    let board = w.service.create_board(&owner, "Legacy", Some(workspace.id)).await.unwrap();

    w.service.delete_workspace(&owner, workspace.id).await.unwrap();

    assert!(w.store.board(board.id).await.unwrap().is_some());
    let access = w.service.resolver().board_access(board.id, u.id).await.unwrap();
    assert!(!access.has_access);
    let owner_access = w.service.resolver().board_access(board.id, owner.id).await.unwrap();
    assert_eq!(owner_access.role, Role::Owner);
}

#[tokio::test]
async fn board_deletion_reaches_open_rooms() {
    let w = world();
    let owner = Actor::new(UserId::new());
    let viewer = Actor::new(UserId::new());
    let board = w.service.create_board(&owner, "Temp", None).await.unwrap();
    w.service.accept_invite(&viewer, board.id).await.unwrap();

    let conn = ConnectionId::generate();
    w.hub.connect(conn.clone(), Identity::new(viewer.id, None)).unwrap();
    let mut sub = w.hub.join(&conn, board.id).await.unwrap();

    w.service.delete_board(&owner, board.id).await.unwrap();

    let event = sub.recv().await.unwrap();
    assert_eq!(event.event, EventName::BoardDeleted);
    assert_eq!(event.payload["board"], board.id.to_string());
    assert_eq!(event.payload["deletedBy"]["id"], owner.id.to_string());
    assert!(kinds_for(&w.store, viewer.id).await.contains(&NotificationKind::BoardDeleted));
}
