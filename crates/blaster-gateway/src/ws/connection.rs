use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::app::AppState;

const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Axum handler: upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection event loop. Read-only stream: status events go out,
/// inbound text is ignored.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS connection");
    state.ws_clients.insert(conn_id.clone(), chrono::Utc::now());

    let (mut tx, mut rx) = socket.split();
    let mut broadcast_rx = state.broadcaster.subscribe();

    let hello = json!({ "type": "hello", "version": env!("CARGO_PKG_VERSION") }).to_string();
    if tx.send(Message::Text(hello.into())).await.is_err() {
        state.ws_clients.remove(&conn_id);
        return;
    }

    let mut tick = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }

            event = broadcast_rx.recv() => {
                match event {
                    Ok(payload) => {
                        if tx.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(conn_id, skipped, "WS client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = tick.tick() => {
                let frame = json!({
                    "type": "tick",
                    "ts": chrono::Utc::now().timestamp_millis(),
                })
                .to_string();
                if tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.ws_clients.remove(&conn_id);
    info!(conn_id, "WS connection closed");
}
