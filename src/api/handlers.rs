use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use super::dispatch::Dispatcher;
use super::error::ApiError;
use super::{AppState, ClientParams};
use crate::connections::{outbound_channel, OutboundReceiver};
use crate::protocol::WireMessage;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Upgrade to the duplex channel. `id` and `place` are checked before the
/// handshake so a bad request never gets a socket.
pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ClientParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let (client_id, place) = params.require()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, place)))
}

enum Exit {
    Closed,
    Evicted,
    Shutdown,
}

async fn handle_socket(socket: WebSocket, state: AppState, client_id: String, place: String) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = outbound_channel();
    let conn = state.connections.register(&client_id, tx);
    tracing::info!(%client_id, %place, conn_id = conn.id(), "channel opened");

    let writer = tokio::spawn(write_loop(ws_tx, rx, client_id.clone()));
    let dispatcher = Dispatcher::new(state.clone(), client_id.clone(), place.clone());

    // One message is handled to completion before the next is read.
    let exit = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break Exit::Closed,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        tracing::debug!(%client_id, error = %e, "read failed");
                        break Exit::Closed;
                    }
                };
                let msg = match serde_json::from_str::<WireMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::error!(%client_id, %place, error = %e, "undecodable message, closing channel");
                        break Exit::Closed;
                    }
                };
                if let Some(reply) = dispatcher.handle(msg).await {
                    conn.send(reply);
                }
            }
            _ = conn.evicted() => break Exit::Evicted,
            _ = state.shutdown.cancelled() => break Exit::Shutdown,
        }
    };

    match exit {
        Exit::Closed => tracing::info!(%client_id, conn_id = conn.id(), "channel closed"),
        Exit::Evicted => {
            tracing::info!(%client_id, conn_id = conn.id(), "channel superseded by a newer connection")
        }
        Exit::Shutdown => tracing::debug!(%client_id, "channel closing for shutdown"),
    }

    state.connections.unregister(&conn);
    // Dropping the last sender lets the writer flush and send its close frame.
    drop(conn);
    drop(dispatcher);
    if let Err(e) = writer.await {
        tracing::warn!(%client_id, error = %e, "writer task failed");
    }
}

/// Sole writer for one socket: drains the outbound queue until every sender
/// is dropped, then closes normally.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: OutboundReceiver,
    client_id: String,
) {
    while let Some(msg) = rx.recv().await {
        let json = match serde_json::to_string(&msg) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(%client_id, action = %msg.action, error = %e, "could not encode message");
                continue;
            }
        };
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            tracing::debug!(%client_id, "socket gone, stopping writer");
            return;
        }
    }
    let close_frame = CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
    let _ = ws_tx.flush().await;
}
