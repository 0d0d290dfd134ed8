use crate::error::ApiError;
use crate::handlers::api::ApiState;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use ephemera_core::{LiveSnapshots, SnapshotEvent};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

/// WebSocket upgrade handler for live snapshots.
///
/// The subscription is opened before upgrading so a missing or expired
/// entity is reported as a plain HTTP error.
pub async fn subscribe_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let live = match state.engine.subscribe(&id) {
        Ok(live) => live,
        Err(e) => {
            debug!("Subscription rejected for {}: {}", id, e);
            return ApiError::from(e).into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, live))
}

async fn handle_socket(socket: WebSocket, mut live: LiveSnapshots) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let entity_id = live.entity_id().to_string();

    info!("Subscriber connected: entity={}", entity_id);

    loop {
        tokio::select! {
            // Handle incoming messages from client
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    // Clients have nothing to say on this channel.
                    Some(Ok(_)) => {}
                }
            }

            // Push snapshots as they come
            event = live.next() => {
                let Some(event) = event else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let gone = matches!(event, SnapshotEvent::Gone);
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode snapshot: {}", e);
                        break;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                    debug!("Failed to send snapshot: {}", e);
                    break;
                }
                if gone {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    // Deregister from the bus before logging the disconnect.
    drop(live);

    info!("Subscriber disconnected: entity={}", entity_id);
}
