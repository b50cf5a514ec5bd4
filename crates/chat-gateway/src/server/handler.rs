//! WebSocket handler
//!
//! Handles WebSocket connections and message processing.

use crate::connection::Connection;
use crate::handlers;
use crate::protocol::{CloseCode, GatewayMessage, HelloPayload};
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Channel buffer size for outgoing messages
const MESSAGE_BUFFER_SIZE: usize = 100;

/// How long the close frame may take to flush
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(state, socket))
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket) {
    let session_id = Connection::generate_id();

    // Create message channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<GatewayMessage>(MESSAGE_BUFFER_SIZE);

    let connection = state
        .connection_manager()
        .add_connection(session_id.clone(), tx);

    tracing::info!(session_id = %session_id, "WebSocket connection established");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Send Hello message immediately
    let hello = GatewayMessage::hello(HelloPayload::with_interval(
        state.config().heartbeat_interval_ms,
    ));
    let hello_sent = match hello.to_json() {
        Ok(json) => ws_sink.send(Message::Text(json)).await.is_ok(),
        Err(_) => false,
    };
    if !hello_sent {
        tracing::warn!(session_id = %session_id, "Failed to send Hello message");
        cleanup_connection(&state, &session_id);
        return;
    }

    // Spawn task to receive messages from WebSocket
    let state_recv = state.clone();
    let connection_recv = connection.clone();
    let mut recv_task = tokio::spawn(async move {
        let session_id = connection_recv.session_id().to_string();
        while let Some(msg) = ws_stream.next().await {
            let close_code = match msg {
                Ok(Message::Text(text)) => {
                    handle_text_message(&state_recv, &connection_recv, &text).await.err()
                }
                Ok(Message::Binary(_)) => {
                    tracing::debug!(session_id = %session_id, "Binary messages not supported");
                    Some(CloseCode::DecodeError)
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Ok(Message::Close(_)) => {
                    tracing::info!(session_id = %session_id, "Client closed connection");
                    return;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                    return;
                }
            };
            if let Some(code) = close_code {
                tracing::debug!(session_id = %session_id, close_code = %code, "Closing connection");
                connection_recv.close(code);
                return;
            }
        }
    });

    // Spawn task to send messages to WebSocket
    let connection_send = connection.clone();
    let mut send_task = tokio::spawn(async move {
        let session_id = connection_send.session_id().to_string();
        loop {
            tokio::select! {
                biased;
                Some(msg) = rx.recv() => {
                    let Ok(json) = msg.to_json() else { continue };
                    if ws_sink.send(Message::Text(json)).await.is_err() {
                        tracing::warn!(session_id = %session_id, "Failed to send message to WebSocket");
                        return;
                    }
                }
                code = connection_send.closed() => {
                    let (code, reason) = GatewayMessage::close_frame(code);
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    let _ = ws_sink.close().await;
                    return;
                }
            }
        }
    });

    // Unidentified sockets do not count for presence, so they get their own deadline
    let identify_timeout = state.config().heartbeat_timeout();
    let connection_watch = connection.clone();
    let identify_watchdog = tokio::spawn(async move {
        tokio::time::sleep(identify_timeout).await;
        if !connection_watch.is_authenticated() {
            tracing::debug!(session_id = %connection_watch.session_id(), "No Identify in time");
            connection_watch.close(CloseCode::SessionTimeout);
        }
    });

    tokio::select! {
        _ = &mut recv_task => {
            if connection.is_closing() {
                // Let the close frame go out
                let _ = tokio::time::timeout(CLOSE_GRACE, &mut send_task).await;
            }
        }
        _ = &mut send_task => {
            tracing::debug!(session_id = %session_id, "Send task ended");
        }
    }

    recv_task.abort();
    send_task.abort();
    identify_watchdog.abort();

    cleanup_connection(&state, &session_id);
}

/// Handle a text message from the client
async fn handle_text_message(
    state: &GatewayState,
    connection: &Arc<Connection>,
    text: &str,
) -> Result<(), CloseCode> {
    let message = match GatewayMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(
                session_id = %connection.session_id(),
                error = %e,
                "Failed to parse message"
            );
            return Err(CloseCode::DecodeError);
        }
    };

    tracing::trace!(
        session_id = %connection.session_id(),
        op = %message.op,
        "Received message"
    );

    match handlers::route(state, connection, message).await {
        Ok(Some(close_code)) => Err(close_code),
        Ok(None) => Ok(()),
        Err(e) => {
            tracing::warn!(
                session_id = %connection.session_id(),
                error = %e,
                "Handler error"
            );
            Err(e.to_close_code().unwrap_or(CloseCode::UnknownError))
        }
    }
}

/// Clean up a connection on disconnect
///
/// Presence release is idempotent, so a connection the sweeper already evicted is safe here.
fn cleanup_connection(state: &GatewayState, session_id: &str) {
    tracing::info!(session_id = %session_id, "Cleaning up connection");

    state.presence().disconnect(session_id);
    state.connection_manager().remove_connection(session_id);
}
