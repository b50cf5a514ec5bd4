//! Identify handler (op 2)

use super::{HandlerError, HandlerResult};
use crate::connection::Connection;
use crate::protocol::{CloseCode, GatewayMessage, IdentifyPayload, ReadyPayload};
use crate::server::GatewayState;
use std::sync::Arc;

/// Handles Identify messages
pub struct IdentifyHandler;

impl IdentifyHandler {
    /// Handle an Identify message
    ///
    /// Verifies the bearer token, links the connection to its user, counts it for presence
    /// and queues READY with the online set.
    pub async fn handle(
        state: &GatewayState,
        connection: &Arc<Connection>,
        payload: IdentifyPayload,
    ) -> HandlerResult<Option<CloseCode>> {
        if connection.is_authenticated() {
            tracing::warn!(
                session_id = %connection.session_id(),
                "Client sent Identify while already authenticated"
            );
            return Ok(Some(CloseCode::AlreadyAuthenticated));
        }

        let verified = state
            .tokens()
            .verify(&payload.token)
            .and_then(|claims| claims.user_id());
        let user_id = match verified {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::debug!(
                    session_id = %connection.session_id(),
                    error = %e,
                    "Token validation failed"
                );
                // Best effort; the close frame follows either way
                let _ = connection.send(GatewayMessage::invalid_session()).await;
                return Err(HandlerError::AuthenticationFailed(e.to_string()));
            }
        };

        let session_id = connection.session_id().to_string();
        if !state
            .connection_manager()
            .authenticate_connection(&session_id, user_id)
        {
            return Ok(Some(CloseCode::AlreadyAuthenticated));
        }

        let mut queued = Ok(());
        state.presence().connect(&session_id, user_id, |online| {
            let ready = ReadyPayload {
                session_id: session_id.clone(),
                user_id,
                online,
            };
            queued = GatewayMessage::ready(&ready, connection.next_sequence())
                .map_err(HandlerError::from)
                .and_then(|message| {
                    connection
                        .try_send(message)
                        .map_err(|e| HandlerError::ConnectionClosed(format!("READY: {e}")))
                });
        });
        queued?;

        tracing::info!(
            session_id = %session_id,
            user_id = %user_id,
            "Client identified"
        );

        Ok(None)
    }
}
