//! Downstream WebSocket Server
//!
//! Axum routes that upgrade client connections and drive them against the
//! [`DownstreamHub`]. Each connection runs a reader loop on the upgrade task
//! and a writer task draining its outbound queue.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};

use super::hub::{ConnectionSession, DownstreamHub};

/// How long the writer may keep flushing after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Create the downstream router, serving WebSocket upgrades on `/` and `/ws`.
pub fn router(hub: Arc<DownstreamHub>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<DownstreamHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<DownstreamHub>) {
    let ConnectionSession {
        id,
        mut outbound,
        closed,
    } = hub.connect();

    let (mut sender, mut receiver) = socket.split();

    let writer_closed = closed.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_closed.cancelled() => {
                    if let Err(e) = sender.send(Message::Close(None)).await {
                        tracing::trace!(conn_id = %id, error = %e, "Close frame not sent");
                    }
                    break;
                }
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!(conn_id = %id, error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let writer_finished = loop {
        tokio::select! {
            () = closed.cancelled() => break false,
            _ = &mut send_task => break true,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => hub.handle_text(id, text.as_str()),
                Some(Ok(Message::Binary(data))) => hub.handle_binary(id, &data),
                Some(Ok(Message::Close(_))) | None => break false,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %id, error = %e, "Client transport error");
                    break false;
                }
            },
        }
    };

    hub.disconnect(id);
    closed.cancel();

    if !writer_finished {
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, send_task).await.is_err() {
            tracing::debug!(conn_id = %id, "Writer did not drain before timeout");
        }
    }
}
