use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::SharedState;
use super::models::ChangeEvent;
use super::realtime::ChangeFeed;

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade to a socket that forwards one team's change feed as JSON text
/// frames, e.g. `{"type":"insert","table":"inbox_messages"}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(team_id): Path<String>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, team_id, state))
}

async fn handle_socket(socket: WebSocket, team_id: String, state: SharedState) {
    let subscription = match state.feed.subscribe(&team_id).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::warn!(team_id = %team_id, error = %e, "websocket subscribe failed");
            return;
        }
    };
    let subscription_id = subscription.id;
    tracing::debug!(team_id = %team_id, subscription = subscription_id.0, "websocket attached");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription.events, state.ping_interval).await;

    state.feed.unsubscribe(subscription_id);
    tracing::debug!(team_id = %team_id, subscription = subscription_id.0, "websocket detached");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines feed forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong arrives
/// within two ping intervals the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ping_every: Duration,
) {
    let pong_timeout = ping_every * 2;
    let mut ping_interval = tokio::time::interval(ping_every);
    // The first tick completes immediately; consume it so the first real
    // ping fires after one interval.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > pong_timeout {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to serialize change event"),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
