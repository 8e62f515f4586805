//! Connection handlers for the Tack server.
//!
//! A channel is authenticated before it reaches the hub: either by a `token`
//! query parameter at upgrade time or by a `connect` frame as the first frame.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::sweeper;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tack_core::{
    BoardId, BoardService, ConnectionId, HubError, Identity, InMemoryStore, RealtimeHub,
    RoleResolver,
};
use tack_protocol::{
    codec, BroadcastPayload, EntityKey, EventName, Frame, FrameType, ParticipantInfo,
    PROTOCOL_VERSION,
};
use tack_transport::{
    split_socket, Connection, FrameSource, JwtVerifier, TokenVerifier, TransportError,
    WebSocketFrames,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    /// Mutation flows for the CRUD layer embedding this server.
    pub service: Arc<BoardService>,
    pub store: Arc<InMemoryStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub config: Config,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(InMemoryStore::new()))
    }

    #[must_use]
    pub fn with_store(config: Config, store: Arc<InMemoryStore>) -> Self {
        let mut hub = RealtimeHub::with_config(config.hub_config());
        if config.realtime.authorize_join {
            hub = hub.with_join_policy(RoleResolver::new(store.clone()));
        }
        let hub = Arc::new(hub);
        let service = Arc::new(BoardService::new(
            store.clone(),
            hub.clone(),
            config.service_config(),
        ));
        let verifier = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));

        Self {
            hub,
            service,
            store,
            verifier,
            config,
        }
    }
}

/// Routes for the realtime endpoint and health check.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server and the reminder sweeper.
///
/// # Errors
///
/// Returns an error if no JWT secret is configured or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.auth.jwt_secret.is_empty() {
        anyhow::bail!("auth.jwt_secret must be set (or TACK_JWT_SECRET)");
    }
    config.validate()?;
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let _sweeper = sweeper::spawn_reminder_sweeper(
        state.store.clone(),
        config.reminder_interval(),
        config.due_window(),
    );
    let _pruner = sweeper::spawn_presence_pruner(
        state.hub.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
    );

    let app = build_router(state);
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Tack server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION.to_string(),
        "rooms": stats.room_count,
        "connections": stats.connection_count,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Verifies a query token before upgrading; a bad token never gets a socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let identity = match params.token {
        Some(token) => match state.verifier.verify(&token).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Rejected WebSocket upgrade");
                metrics::record_error("auth");
                return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
            }
        },
        None => None,
    };

    let max_message_size = state.config.transport.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, identity))
}

/// Reasons a channel never became authenticated.
#[derive(Debug, Error)]
enum HandshakeError {
    #[error("no connect frame within {0:?}")]
    Timeout(Duration),

    #[error("channel closed before connect")]
    Closed,

    #[error("expected connect frame, got {0:?}")]
    UnexpectedFrame(FrameType),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("connect frame carried no token")]
    MissingToken,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl HandshakeError {
    fn error_code(&self) -> u16 {
        match self {
            Self::UnexpectedFrame(_) | Self::UnsupportedVersion(_) => 1001,
            Self::Transport(e) => e.error_code(),
            Self::Timeout(_) | Self::Closed | Self::MissingToken => 1401,
        }
    }
}

/// Wait for the `connect` frame and verify its token.
async fn handshake(
    frames: &mut WebSocketFrames,
    verifier: &dyn TokenVerifier,
    timeout: Duration,
) -> Result<Identity, HandshakeError> {
    let frame = tokio::time::timeout(timeout, frames.recv())
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??
        .ok_or(HandshakeError::Closed)?;

    match frame {
        Frame::Connect { version, token } => {
            if !PROTOCOL_VERSION.accepts_client(version) {
                return Err(HandshakeError::UnsupportedVersion(version));
            }
            let token = token.ok_or(HandshakeError::MissingToken)?;
            Ok(verifier.verify(&token).await?)
        }
        other => Err(HandshakeError::UnexpectedFrame(other.frame_type())),
    }
}

async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, identity: Option<Identity>) {
    let connection_id = ConnectionId::generate();
    let (mut conn, mut frames) = split_socket(
        socket,
        connection_id.clone(),
        state.config.transport.max_message_size,
    );

    let identity = match identity {
        Some(identity) => identity,
        None => match handshake(&mut frames, state.verifier.as_ref(), state.config.heartbeat_timeout()).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Handshake failed");
                metrics::record_error("auth");
                let _ = send_frame(&mut conn, &Frame::error(0, e.error_code(), e.to_string())).await;
                let _ = conn.close().await;
                return;
            }
        },
    };

    if let Err(e) = state.hub.connect(connection_id.clone(), identity.clone()) {
        error!(connection = %connection_id, error = %e, "Hub refused channel");
        let _ = send_frame(&mut conn, &Frame::error(0, e.error_code(), e.to_string())).await;
        let _ = conn.close().await;
        return;
    }
    let _metrics_guard = ConnectionMetricsGuard::new();

    debug!(connection = %connection_id, user = %identity.user_id, "WebSocket connected");

    let heartbeat_ms = u32::try_from(state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = Frame::connected(
        connection_id.as_str(),
        identity.user_id.to_string(),
        PROTOCOL_VERSION.major,
        heartbeat_ms,
    );
    if send_frame(&mut conn, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected frame");
        state.hub.disconnect(&connection_id);
        return;
    }

    let (tx, mut outbound) = mpsc::channel::<Bytes>(state.config.transport.outbound_buffer);
    let mut session = Session {
        id: connection_id.clone(),
        identity,
        rooms: HashMap::new(),
        tx,
    };

    let timeout = state.config.heartbeat_timeout();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Pre-encoded broadcasts from joined rooms
            Some(data) = outbound.recv() => {
                metrics::record_frame("outbound");
                metrics::record_outbound_bytes(data.len());
                if conn.send_raw(data).await.is_err() {
                    break;
                }
            }

            inbound = frames.recv() => {
                match inbound {
                    Ok(Some(frame)) => {
                        last_seen = Instant::now();
                        state.hub.touch(&connection_id);
                        let start = Instant::now();
                        metrics::record_frame("inbound");

                        if let Err(e) = session.handle_frame(frame, &mut conn, &state).await {
                            debug!(connection = %connection_id, error = %e, "Channel write failed");
                            break;
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "Dropping channel");
                        metrics::record_error("websocket");
                        let _ = send_frame(&mut conn, &Frame::error(0, e.error_code(), e.to_string())).await;
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > timeout {
                    info!(connection = %connection_id, "Heartbeat timeout");
                    break;
                }
            }
        }
    }

    session.abort_all();
    state.hub.disconnect(&connection_id);
    metrics::set_active_rooms(state.hub.stats().room_count);
    let _ = conn.close().await;

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Per-channel room forwarding.
struct Session {
    id: ConnectionId,
    identity: Identity,
    /// One forwarding task per joined room.
    rooms: HashMap<BoardId, JoinHandle<()>>,
    tx: mpsc::Sender<Bytes>,
}

/// Queue one broadcast frame for the socket writer. A full queue drops the
/// frame; returns `false` once the writer is gone.
fn forward_frame(tx: &mpsc::Sender<Bytes>, frame: Bytes, connection: &ConnectionId, board: BoardId) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(connection = %connection, board = %board, "Outbound queue full, broadcast dropped");
            metrics::record_error("outbound_full");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

impl Session {
    /// Handle a decoded frame. Only channel write failures are returned;
    /// request failures are answered with an `error` frame.
    async fn handle_frame(
        &mut self,
        frame: Frame,
        conn: &mut impl Connection,
        state: &AppState,
    ) -> Result<(), TransportError> {
        match frame {
            Frame::Join { id, board } => {
                debug!(connection = %self.id, board = %board, "Join request");
                match self.join(&board, state).await {
                    Ok(participants) => {
                        send_frame(conn, &Frame::ack(id)).await?;
                        send_frame(conn, &Frame::presence(board, participants)).await?;
                    }
                    Err(e) => {
                        warn!(connection = %self.id, board = %board, error = %e, "Join failed");
                        send_frame(conn, &Frame::error(id, e.error_code(), e.to_string())).await?;
                    }
                }
            }

            Frame::Leave { id, board } => {
                debug!(connection = %self.id, board = %board, "Leave request");
                let response = match self.leave(&board, state) {
                    Ok(()) => Frame::ack(id),
                    Err(e) => Frame::error(id, e.error_code(), e.to_string()),
                };
                send_frame(conn, &response).await?;
            }

            Frame::Typing { board, card, typing } => {
                let entity = serde_json::json!({ "id": card, "typing": typing });
                self.relay(conn, state, &board, EventName::CardTyping, EntityKey::Card, entity)
                    .await?;
            }

            Frame::Cursor { board, x, y } => {
                let entity = serde_json::json!({ "id": board, "x": x, "y": y });
                self.relay(conn, state, &board, EventName::BoardCursor, EntityKey::Board, entity)
                    .await?;
            }

            Frame::Ping { timestamp } => {
                send_frame(conn, &Frame::pong(timestamp)).await?;
            }

            // Liveness is refreshed for every inbound frame.
            Frame::Pong { .. } => {}

            Frame::Connect { version, .. } => {
                debug!(connection = %self.id, version, "Connect frame (already connected)");
            }

            other => {
                let frame_type = other.frame_type();
                warn!(connection = %self.id, frame_type = ?frame_type, "Unexpected frame type");
                let message = format!("unexpected frame {frame_type:?}");
                send_frame(conn, &Frame::error(0, 1001, message)).await?;
            }
        }

        Ok(())
    }

    async fn join(&mut self, board: &str, state: &AppState) -> Result<Vec<ParticipantInfo>, HubError> {
        let board = BoardId::parse(board)?;
        let mut subscription = state.hub.join(&self.id, board).await?;

        let tx = self.tx.clone();
        let connection = self.id.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if !forward_frame(&tx, event.frame.clone(), &connection, board) {
                    break;
                }
            }
        });
        if let Some(stale) = self.rooms.insert(board, handle) {
            stale.abort();
        }

        metrics::record_join();
        metrics::set_active_rooms(state.hub.stats().room_count);
        Ok(state.hub.participants(board))
    }

    fn leave(&mut self, board: &str, state: &AppState) -> Result<(), HubError> {
        let board = BoardId::parse(board)?;
        if let Some(handle) = self.rooms.remove(&board) {
            handle.abort();
        }
        state.hub.leave(&self.id, board)?;
        metrics::set_active_rooms(state.hub.stats().room_count);
        Ok(())
    }

    /// Forward an ephemeral client event to the rest of the room.
    async fn relay(
        &self,
        conn: &mut impl Connection,
        state: &AppState,
        board: &str,
        event: EventName,
        entity_key: EntityKey,
        entity: serde_json::Value,
    ) -> Result<(), TransportError> {
        let payload =
            BroadcastPayload::for_event(event, entity_key, entity, self.identity.actor().actor_ref());
        let published = BoardId::parse(board)
            .map_err(HubError::from)
            .and_then(|board| state.hub.publish_from(&self.id, board, event, &payload));

        match published {
            Ok(recipients) => {
                metrics::record_broadcast(event.as_str());
                debug!(connection = %self.id, event = %event, recipients, "Relayed");
            }
            Err(e) => {
                debug!(connection = %self.id, event = %event, error = %e, "Relay refused");
                send_frame(conn, &Frame::error(0, e.error_code(), e.to_string())).await?;
            }
        }
        Ok(())
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.rooms.drain() {
            handle.abort();
        }
    }
}

async fn send_frame(conn: &mut impl Connection, frame: &Frame) -> Result<(), TransportError> {
    let data = codec::encode(frame)?;
    metrics::record_frame("outbound");
    metrics::record_outbound_bytes(data.len());
    conn.send_raw(data).await
}
