//! services/sync_agent/src/web/ws_handler.rs
//!
//! The sync status stream. Every connection gets the current state right away and
//! a new frame on each transition; clients may also ask for a sync over the socket.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, Stream, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

/// Status frames for as long as the agent lives: the current state, then one per change.
pub fn status_frames(app_state: Arc<AppState>) -> impl Stream<Item = ServerMessage> {
    let mut states = app_state.engine().watch_state();
    let mut network = app_state.network.subscribe();
    async_stream::stream! {
        loop {
            let state = states.borrow_and_update().clone();
            let is_online = *network.borrow_and_update();
            yield ServerMessage::SyncStatus { state, is_online };

            tokio::select! {
                changed = states.changed() => if changed.is_err() { break },
                changed = network.changed() => if changed.is_err() { break },
            }
        }
    }
}

async fn send_frame(sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>, frame: &ServerMessage) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode status frame: {}", e);
            return false;
        }
    };
    sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New sync status connection established");

    // The sender is shared between the status pump and the request loop below.
    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    // --- 1. Status Pump ---
    let pump = {
        let ws_sender = ws_sender.clone();
        let frames = status_frames(app_state.clone());
        tokio::spawn(async move {
            futures::pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                if !send_frame(&ws_sender, &frame).await {
                    debug!("Status client went away");
                    break;
                }
            }
        })
    };

    // --- 2. Main Message Loop ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::ForceSync) => {
                        let outcome = app_state.facade.force_sync().await;
                        Some(ServerMessage::SyncResult {
                            success: outcome.success,
                            message: outcome.message,
                        })
                    }
                    Ok(ClientMessage::Dismiss) => {
                        app_state.engine().settle();
                        None
                    }
                    Err(e) => {
                        warn!("Unrecognized client message: {}", e);
                        Some(ServerMessage::Error {
                            message: format!("Unrecognized message: {}", e),
                        })
                    }
                };
                if let Some(reply) = reply {
                    if !send_frame(&ws_sender, &reply).await {
                        break;
                    }
                }
            }
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- 3. Cleanup ---
    pump.abort();
    info!("Sync status connection closed.");
}
