//! Individual WebSocket connection
//!
//! Represents a single WebSocket connection and its state.

use crate::protocol::{CloseCode, GatewayMessage};
use chat_core::Snowflake;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Connection established, waiting for Identify
    Connecting,
    /// Successfully authenticated
    Connected,
    /// Connection is being closed
    Disconnecting,
}

/// A single WebSocket connection
pub struct Connection {
    /// Unique session ID
    session_id: String,

    /// Authenticated user ID (None until Identify)
    user_id: RwLock<Option<Snowflake>>,

    /// Current connection state
    state: RwLock<ConnectionState>,

    /// Channel to send messages to the WebSocket
    sender: mpsc::Sender<GatewayMessage>,

    /// Last sequence number sent
    sequence: AtomicU64,

    /// Close code requested by the server side, first one wins
    close_code: Mutex<Option<CloseCode>>,
    close_notify: Notify,

    /// Connection creation time
    created_at: Instant,
}

impl Connection {
    /// Create a new connection
    pub fn new(session_id: String, sender: mpsc::Sender<GatewayMessage>) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            user_id: RwLock::new(None),
            state: RwLock::new(ConnectionState::Connecting),
            sender,
            sequence: AtomicU64::new(0),
            close_code: Mutex::new(None),
            close_notify: Notify::new(),
            created_at: Instant::now(),
        })
    }

    /// Generate a new unique session ID
    #[must_use]
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the user ID (if authenticated)
    pub fn user_id(&self) -> Option<Snowflake> {
        *self.user_id.read()
    }

    /// Link the connection to a user; fails if it was already linked
    pub fn authenticate(&self, user_id: Snowflake) -> bool {
        let mut current = self.user_id.write();
        if current.is_some() {
            return false;
        }
        *current = Some(user_id);
        *self.state.write() = ConnectionState::Connected;
        true
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.read().is_some()
    }

    /// Get the next sequence number
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get the current sequence number
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get connection age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Send a message to this connection
    pub async fn send(&self, message: GatewayMessage) -> Result<(), mpsc::error::SendError<GatewayMessage>> {
        self.sender.send(message).await
    }

    /// Try to send a message (non-blocking)
    pub fn try_send(&self, message: GatewayMessage) -> Result<(), mpsc::error::TrySendError<GatewayMessage>> {
        self.sender.try_send(message)
    }

    /// Send a dispatch stamped with this connection's next sequence number
    pub async fn dispatch(&self, event_type: &str, data: Value) -> bool {
        if self.is_closing() {
            return false;
        }
        let message = GatewayMessage::dispatch(event_type, self.next_sequence(), data);
        self.sender.send(message).await.is_ok()
    }

    /// Check if the sender channel is closed
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Ask the socket task to close this connection with `code`
    pub fn close(&self, code: CloseCode) {
        {
            let mut close_code = self.close_code.lock();
            if close_code.is_some() {
                return;
            }
            *close_code = Some(code);
        }
        *self.state.write() = ConnectionState::Disconnecting;
        self.close_notify.notify_one();
    }

    pub fn is_closing(&self) -> bool {
        self.close_code.lock().is_some()
    }

    /// Resolves once [`Connection::close`] has been called
    pub async fn closed(&self) -> CloseCode {
        loop {
            let notified = self.close_notify.notified();
            if let Some(code) = *self.close_code.lock() {
                return code;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("created_at", &self.created_at)
            .finish()
    }
}
