//! Client op handlers
//!
//! Identify and Heartbeat are the only ops a client may send, and Identify must come first.
//! Any other frame ends the session with a close code.

mod error;
mod heartbeat;
mod identify;

pub use error::{HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use identify::IdentifyHandler;

use crate::connection::Connection;
use crate::protocol::{CloseCode, GatewayMessage, OpCode};
use crate::server::GatewayState;
use std::sync::Arc;

/// Route one decoded client frame
///
/// `Ok(Some(code))` asks the caller to close the socket with `code`.
pub async fn route(
    state: &GatewayState,
    connection: &Arc<Connection>,
    message: GatewayMessage,
) -> HandlerResult<Option<CloseCode>> {
    if message.op != OpCode::Identify && !connection.is_authenticated() {
        return Err(HandlerError::NotAuthenticated);
    }

    if !message.op.is_client_op() {
        tracing::warn!(
            session_id = %connection.session_id(),
            op = %message.op,
            "Client sent a server op"
        );
        return Ok(Some(CloseCode::UnknownOpcode));
    }

    if let Some(payload) = message.as_identify() {
        return IdentifyHandler::handle(state, connection, payload).await;
    }
    match message.as_heartbeat_seq() {
        Some(last_sequence) => {
            HeartbeatHandler::handle(state.presence(), connection, last_sequence).await
        }
        None => Err(HandlerError::InvalidPayload(format!(
            "Malformed {} payload",
            message.op
        ))),
    }
}
