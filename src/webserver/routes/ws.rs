/// WebSocket transport
///
/// One task per socket: the reader loop below handles inbound frames, the
/// authentication grace timer and close detection, while a writer task drains
/// the connection's outbound queue into text frames. The gateway owns all
/// state; this module only moves frames.
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::Instant;

use crate::{
    arguments::is_debug_gateway_enabled,
    errors::DisconnectReason,
    logger::{self, LogTag},
    webserver::state::AppState,
};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let gateway = Arc::clone(&state.gateway);
    let connection = gateway.accept();
    let conn_id = connection.id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: queue -> socket, until the queue is closed and drained
    let writer_conn = Arc::clone(&connection);
    let mut writer = tokio::spawn(async move {
        while let Some(envelope) = writer_conn.next_outbound().await {
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    logger::error(
                        LogTag::Webserver,
                        &format!("Connection {}: failed to encode '{}': {}", conn_id, envelope.kind, e),
                    );
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let auth_deadline = tokio::time::sleep_until(connection.auth_deadline());
    tokio::pin!(auth_deadline);

    let reason = loop {
        tokio::select! {
            _ = connection.closed() => break None,

            _ = &mut auth_deadline, if !connection.is_authenticated() => {
                if gateway.enforce_auth_deadline(conn_id) {
                    break None;
                }
            }

            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    // Errors were already reported to the client
                    let _ = gateway.handle_inbound(conn_id, &text);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = gateway.handle_inbound(conn_id, &String::from_utf8_lossy(&bytes));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    connection.record_activity(Instant::now());
                }
                Some(Ok(Message::Close(_))) | None => break Some(DisconnectReason::ClientClosed),
                Some(Err(e)) => {
                    logger::warning(
                        LogTag::Webserver,
                        &format!("Connection {}: websocket error: {}", conn_id, e),
                    );
                    break Some(DisconnectReason::TransportError);
                }
            },
        }
    };

    if let Some(reason) = reason {
        gateway.disconnect(conn_id, reason);
    }

    // Best-effort flush of whatever was queued before the close
    if tokio::time::timeout(gateway.drain_timeout(), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
        let discarded = connection.discard_pending();
        if is_debug_gateway_enabled() {
            logger::debug(
                LogTag::Webserver,
                &format!(
                    "Connection {}: drain timed out, discarded {} message(s)",
                    conn_id, discarded
                ),
            );
        }
    }
}
