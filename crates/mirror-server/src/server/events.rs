//! WebSocket endpoints.
//!
//! Two channels with distinct wire shapes: `/monitor/ws` streams raw
//! watch notifications, `/filesystem/ws` streams tree-mirror change
//! events and answers `get_tree` requests with a full snapshot.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use mirror::hub::SubscriberHub;

use crate::server::ServerState;

pub(crate) async fn monitor_ws(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_monitor(state, socket))
}

pub(crate) async fn filesystem_ws(
    State(state): State<Arc<ServerState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_filesystem(state, socket))
}

async fn handle_monitor(state: Arc<ServerState>, socket: WebSocket) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (id, mut rx) = state.monitor_hub.connect();
    tracing::debug!("monitor subscriber {id} connected");

    // Write task: forward hub fan-out to the WebSocket.
    let write_task = async move {
        while let Some(message) = rx.recv().await {
            if ws_sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    };

    // Read task: the monitor channel is one-way, only watch for close.
    let read_task = async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = write_task => {},
        _ = read_task => {},
    }

    state.monitor_hub.disconnect(id);
    tracing::debug!("monitor subscriber {id} disconnected");
}

async fn handle_filesystem(state: Arc<ServerState>, socket: WebSocket) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (id, mut rx) = state.filesystem_hub.connect();
    tracing::debug!("filesystem subscriber {id} connected");

    let write_task = async move {
        while let Some(message) = rx.recv().await {
            if ws_sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    };

    // Read task: answer tree snapshot requests on this connection.
    let request_state = state.clone();
    let read_task = async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            match message {
                Message::Text(text) => {
                    handle_filesystem_request(&request_state, id, &text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = write_task => {},
        _ = read_task => {},
    }

    state.filesystem_hub.disconnect(id);
    tracing::debug!("filesystem subscriber {id} disconnected");
}

fn handle_filesystem_request(state: &ServerState, id: mirror::hub::SubscriberId, text: &str) {
    let request: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!("invalid message from filesystem subscriber {id}: {error}");
            return;
        }
    };
    match request.get("action").and_then(|action| action.as_str()) {
        Some("get_tree") => {
            let reply = match state.tree.serialize_tree() {
                Ok(snapshot) => serde_json::json!({
                    "type": "filesystem_tree",
                    "data": snapshot,
                }),
                Err(error) => serde_json::json!({
                    "type": "error",
                    "message": error.to_string(),
                }),
            };
            send_reply(&state.filesystem_hub, id, &reply);
        }
        Some(other) => {
            tracing::warn!("unknown action {other:?} from filesystem subscriber {id}");
        }
        None => {
            tracing::warn!("message from filesystem subscriber {id} missing 'action' field");
        }
    }
}

fn send_reply(hub: &SubscriberHub, id: mirror::hub::SubscriberId, reply: &serde_json::Value) {
    if !hub.send_to(id, &reply.to_string()) {
        tracing::debug!("reply to subscriber {id} dropped");
    }
}
