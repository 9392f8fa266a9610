//! WebSocket connection handling.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use webgate_protocol::{ErrorBody, ErrorCode, Reply};

use crate::dispatch::{handle_frame, FrameOutcome, PendingReply};
use crate::state::AppState;

/// Pause before closing a connection that failed authentication.
const AUTH_FAIL_DELAY: Duration = Duration::from_millis(500);

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Run one connection: receive loop plus an outbound reply queue.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let connection_id = Uuid::new_v4().to_string();
    // Client identity is the connection's peer address; sessions are bound
    // to it for ownership checks.
    let client_id = addr.ip().to_string();
    info!("WebSocket connected: {} from {}", connection_id, addr);

    if !state.connection_opened(&client_id) {
        warn!("Connection limit exceeded, rejecting {}", addr);
        let mut socket = socket;
        let _ = socket.close().await;
        return;
    }

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(100);

    // Outbound task: serialize replies onto the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            match serde_json::to_string(&reply) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to serialize reply: {}", e),
            }
        }
    });

    // Per-session forwarders keep replies for one session in arrival
    // order while letting different sessions interleave freely.
    let mut forwarders: HashMap<String, mpsc::UnboundedSender<PendingReply>> = HashMap::new();

    let mut authed = !state.auth.required();
    let mut consecutive_malformed: u32 = 0;

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                debug!("Received frame on {}", connection_id);
                let outcome = handle_frame(
                    &state,
                    &client_id,
                    &text,
                    &mut authed,
                    &mut consecutive_malformed,
                )
                .await;

                match outcome {
                    FrameOutcome::Reply(reply) => {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    FrameOutcome::Enqueued {
                        session_id,
                        pending,
                    } => {
                        let forwarder = forwarders.entry(session_id).or_insert_with(|| {
                            spawn_forwarder(reply_tx.clone())
                        });
                        if forwarder.send(pending).is_err() {
                            // Forwarder died with the socket; give up.
                            break;
                        }
                    }
                    FrameOutcome::AuthFailed(reply) => {
                        let _ = reply_tx.send(reply).await;
                        tokio::time::sleep(AUTH_FAIL_DELAY).await;
                        break;
                    }
                    FrameOutcome::MalformedLimit(reply) => {
                        let _ = reply_tx.send(reply).await;
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed: {}", connection_id);
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!("Heartbeat on {}", connection_id);
            }
            Err(e) => {
                warn!("WebSocket error on {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // The peer is gone; undelivered replies have nowhere to go.
    forwarders.clear();
    drop(reply_tx);
    sender_task.abort();

    // Sessions survive a disconnect for the grace period, then go away
    // unless the client reconnected.
    let last_connection = state.connection_closed(&client_id);
    if last_connection {
        let state = Arc::clone(&state);
        let client_id = client_id.clone();
        let grace = Duration::from_secs(state.config.server.disconnect_grace_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !state.client_has_connections(&client_id) {
                state.sessions.close_client_sessions(&client_id).await;
            }
        });
    }

    info!("WebSocket disconnected: {}", connection_id);
}

/// Spawn a task that resolves queued command results in order and pushes
/// the replies onto the connection's outbound queue.
fn spawn_forwarder(reply_tx: mpsc::Sender<Reply>) -> mpsc::UnboundedSender<PendingReply> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PendingReply>();
    tokio::spawn(async move {
        while let Some(pending) = rx.recv().await {
            let PendingReply {
                request_id,
                started,
                rx: result_rx,
            } = pending;
            let result = result_rx.await;
            let elapsed = started.elapsed().as_millis() as u64;
            let reply = match result {
                Ok(Ok(payload)) => Reply::success(request_id, payload, elapsed),
                Ok(Err(body)) => Reply::failure(request_id, body, elapsed),
                Err(_) => Reply::failure(
                    request_id,
                    ErrorBody::new(ErrorCode::SessionNotFound, "Session terminated"),
                    elapsed,
                ),
            };
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });
    tx
}
