//! WebSocket endpoint against a live listener.

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tack_core::{Actor, UserId};
use tack_protocol::{codec, EventName, Frame};
use tack_server::{build_router, AppState, Config};
use tack_transport::Claims;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-secret";

fn test_config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.notifications.detached = false;
    config.metrics.enabled = false;
    config
}

async fn start(config: Config) -> (Arc<AppState>, SocketAddr) {
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, addr)
}

fn token_for(user: UserId) -> String {
    let claims = Claims {
        sub: user.to_string(),
        email: None,
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn send(ws: &mut Ws, frame: &Frame) {
    let data = codec::encode(frame).unwrap();
    ws.send(Message::Binary(data.to_vec())).await.unwrap();
}

async fn next_frame(ws: &mut Ws) -> Frame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Binary(data) = msg {
            return codec::decode(&data).unwrap();
        }
    }
}

/// Connect with a query token and consume the `connected` frame.
async fn open(addr: SocketAddr, user: UserId) -> Ws {
    let url = format!("ws://{addr}/ws?token={}", token_for(user));
    let (mut ws, _) = connect_async(url).await.unwrap();
    match next_frame(&mut ws).await {
        Frame::Connected { user_id, .. } => assert_eq!(user_id, user.to_string()),
        other => panic!("expected connected, got {other:?}"),
    }
    ws
}

async fn join(ws: &mut Ws, id: u64, board: &str) {
    send(ws, &Frame::join(id, board)).await;
    assert_eq!(next_frame(ws).await, Frame::ack(id));
    assert!(matches!(next_frame(ws).await, Frame::Presence { .. }));
}

/// A ping round trip proves nothing else was queued ahead of the pong.
async fn assert_nothing_pending(ws: &mut Ws) {
    send(ws, &Frame::ping()).await;
    assert!(matches!(next_frame(ws).await, Frame::Pong { .. }));
}

#[tokio::test]
async fn test_bad_query_token_is_refused_before_upgrade() {
    let (state, addr) = start(test_config()).await;
    let result = connect_async(format!("ws://{addr}/ws?token=garbage")).await;
    assert!(result.is_err());
    assert_eq!(state.hub.stats().connection_count, 0);
}

#[tokio::test]
async fn test_connect_frame_handshake() {
    let (_state, addr) = start(test_config()).await;
    let user = UserId::new();
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    send(&mut ws, &Frame::connect(1, Some(token_for(user)))).await;
    match next_frame(&mut ws).await {
        Frame::Connected { user_id, version, .. } => {
            assert_eq!(user_id, user.to_string());
            assert_eq!(version, 1);
        }
        other => panic!("expected connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_without_token_is_rejected() {
    let (_state, addr) = start(test_config()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    send(&mut ws, &Frame::connect(1, None)).await;
    match next_frame(&mut ws).await {
        Frame::Error { code, .. } => assert_eq!(code, 1401),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_mutation_reaches_other_participants_only() {
    let (state, addr) = start(test_config()).await;
    let owner = Actor::new(UserId::new());
    let viewer = Actor::new(UserId::new());
    let board = state.service.create_board(&owner, "Roadmap", None).await.unwrap();
    state.service.accept_invite(&viewer, board.id).await.unwrap();
    let board_id = board.id.to_string();

    let mut owner_ws = open(addr, owner.id).await;
    let mut viewer_ws = open(addr, viewer.id).await;
    join(&mut owner_ws, 1, &board_id).await;
    join(&mut viewer_ws, 1, &board_id).await;

    state.service.rename_board(&owner, board.id, "Roadmap 2027").await.unwrap();

    match next_frame(&mut viewer_ws).await {
        Frame::Event { board, event, payload } => {
            assert_eq!(board, board_id);
            assert_eq!(event, EventName::BoardUpdated);
            assert_eq!(payload["board"]["title"], "Roadmap 2027");
            assert_eq!(payload["updatedBy"]["id"], owner.id.to_string());
        }
        other => panic!("expected event, got {other:?}"),
    }
    assert_nothing_pending(&mut owner_ws).await;
}

#[tokio::test]
async fn test_typing_is_relayed_without_echo() {
    let (state, addr) = start(test_config()).await;
    let owner = Actor::new(UserId::new());
    let viewer = Actor::new(UserId::new());
    let board = state.service.create_board(&owner, "Sprint", None).await.unwrap();
    state.service.accept_invite(&viewer, board.id).await.unwrap();
    let board_id = board.id.to_string();

    let mut owner_ws = open(addr, owner.id).await;
    let mut viewer_ws = open(addr, viewer.id).await;
    join(&mut owner_ws, 1, &board_id).await;
    join(&mut viewer_ws, 1, &board_id).await;

    send(
        &mut owner_ws,
        &Frame::Typing {
            board: board_id.clone(),
            card: "card-7".into(),
            typing: true,
        },
    )
    .await;

    match next_frame(&mut viewer_ws).await {
        Frame::Event { event, payload, .. } => {
            assert_eq!(event, EventName::CardTyping);
            assert_eq!(payload["card"]["id"], "card-7");
            assert_eq!(payload["card"]["typing"], true);
        }
        other => panic!("expected typing event, got {other:?}"),
    }
    assert_nothing_pending(&mut owner_ws).await;
}

#[tokio::test]
async fn test_relay_requires_joined_room() {
    let (state, addr) = start(test_config()).await;
    let owner = Actor::new(UserId::new());
    let board = state.service.create_board(&owner, "Solo", None).await.unwrap();
    let mut ws = open(addr, owner.id).await;

    send(
        &mut ws,
        &Frame::Cursor {
            board: board.id.to_string(),
            x: 1.0,
            y: 2.0,
        },
    )
    .await;
    match next_frame(&mut ws).await {
        Frame::Error { code, .. } => assert_eq!(code, 1008),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_join_policy_refuses_outsiders() {
    let mut config = test_config();
    config.realtime.authorize_join = true;
    let (state, addr) = start(config).await;
    let owner = Actor::new(UserId::new());
    let board = state.service.create_board(&owner, "Private", None).await.unwrap();

    let mut outsider = open(addr, UserId::new()).await;
    send(&mut outsider, &Frame::join(9, board.id.to_string())).await;
    match next_frame(&mut outsider).await {
        Frame::Error { id, code, .. } => {
            assert_eq!(id, 9);
            assert_eq!(code, 1003);
        }
        other => panic!("expected error, got {other:?}"),
    }

    let mut member = open(addr, owner.id).await;
    join(&mut member, 1, &board.id.to_string()).await;
}

#[tokio::test]
async fn test_disconnect_notifies_remaining_participants() {
    let (state, addr) = start(test_config()).await;
    let owner = Actor::new(UserId::new());
    let viewer = Actor::new(UserId::new());
    let board = state.service.create_board(&owner, "Leaving", None).await.unwrap();
    state.service.accept_invite(&viewer, board.id).await.unwrap();
    let board_id = board.id.to_string();

    let mut owner_ws = open(addr, owner.id).await;
    let mut viewer_ws = open(addr, viewer.id).await;
    join(&mut owner_ws, 1, &board_id).await;
    join(&mut viewer_ws, 1, &board_id).await;

    viewer_ws.close(None).await.unwrap();

    match next_frame(&mut owner_ws).await {
        Frame::Event { event, payload, .. } => {
            assert_eq!(event, EventName::ParticipantLeft);
            assert_eq!(payload["userId"], viewer.id.to_string());
        }
        other => panic!("expected participant:left, got {other:?}"),
    }
}
