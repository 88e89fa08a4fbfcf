use crate::server::AppState;
use axum::Extension;
use axum::extract::Path;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/sessions/{session_id}/events", get(ws_upgrade))
}

async fn ws_upgrade(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(state, session_id, socket))
}

/// Forwards the session's operation events to one WebSocket observer.
///
/// Delivery is live-only: nothing is replayed on connect, and if the hub
/// drops this observer for falling behind, the socket is closed rather
/// than resumed.
#[tracing::instrument(level = "info", skip_all, fields(session_id = %session_id))]
async fn handle_socket(state: Arc<AppState>, session_id: String, socket: WebSocket) {
    let mut handle = state.hub.register(session_id.as_str());
    tracing::info!(observer_id = %handle.observer_id(), "observer connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let shutdown = state.shutdown.child_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                break;
            }
            event = handle.recv() => {
                // None means the hub already dropped this observer.
                let Some(event) = event else { break };
                let payload = match serde_json::to_string(&event) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize operation event");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The event feed is one-way; client frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unregister(&handle);
    tracing::info!(observer_id = %handle.observer_id(), "observer disconnected");
}
