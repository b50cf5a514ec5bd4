//! Connection manager
//!
//! Manages all active WebSocket connections using DashMap for thread-safe access.

use super::Connection;
use crate::protocol::GatewayMessage;
use chat_core::Snowflake;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Manages all active WebSocket connections
///
/// Uses `DashMap` for concurrent access to connection state.
pub struct ConnectionManager {
    /// Active connections by session ID
    connections: DashMap<String, Arc<Connection>>,

    /// User ID to session IDs mapping
    user_connections: DashMap<Snowflake, HashSet<String>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_connections: DashMap::new(),
        }
    }

    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection
    pub fn add_connection(
        &self,
        session_id: String,
        sender: mpsc::Sender<GatewayMessage>,
    ) -> Arc<Connection> {
        let connection = Connection::new(session_id.clone(), sender);
        self.connections.insert(session_id.clone(), connection.clone());

        tracing::debug!(session_id = %session_id, "Connection added");

        connection
    }

    /// Remove a connection
    ///
    /// Uses `remove_if` so an emptied user entry is dropped atomically.
    pub fn remove_connection(&self, session_id: &str) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(session_id)?;

        if let Some(user_id) = connection.user_id() {
            if let Some(mut sessions) = self.user_connections.get_mut(&user_id) {
                sessions.remove(session_id);
            }
            self.user_connections
                .remove_if(&user_id, |_, sessions| sessions.is_empty());
        }

        tracing::debug!(session_id = %session_id, "Connection removed");
        Some(connection)
    }

    /// Get a connection by session ID
    pub fn get_connection(&self, session_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(session_id).map(|r| r.clone())
    }

    /// Authenticate a connection (link to user)
    pub fn authenticate_connection(&self, session_id: &str, user_id: Snowflake) -> bool {
        let Some(connection) = self.get_connection(session_id) else {
            return false;
        };
        if !connection.authenticate(user_id) {
            return false;
        }

        self.user_connections
            .entry(user_id)
            .or_default()
            .insert(session_id.to_string());

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            "Connection authenticated"
        );
        true
    }

    /// Get all connections for a user
    pub fn get_user_connections(&self, user_id: Snowflake) -> Vec<Arc<Connection>> {
        self.user_connections
            .get(&user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|sid| self.connections.get(sid).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All authenticated connections
    pub fn authenticated_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|c| c.is_authenticated())
            .map(|c| c.clone())
            .collect()
    }

    /// Dispatch an event to all connections of a user
    pub async fn dispatch_to_user(&self, user_id: Snowflake, event_type: &str, data: &Value) -> usize {
        let mut sent = 0;
        for conn in self.get_user_connections(user_id) {
            if conn.dispatch(event_type, data.clone()).await {
                sent += 1;
            }
        }

        tracing::trace!(
            user_id = %user_id,
            event_type,
            sent = sent,
            "Event sent to user connections"
        );

        sent
    }

    /// Dispatch an event to every authenticated connection
    pub async fn dispatch_to_all(&self, event_type: &str, data: &Value) -> usize {
        let mut sent = 0;
        for conn in self.authenticated_connections() {
            if conn.dispatch(event_type, data.clone()).await {
                sent += 1;
            }
        }

        tracing::debug!(event_type, sent = sent, "Event broadcast to all connections");

        sent
    }

    /// Get the total number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of unique authenticated users
    pub fn user_count(&self) -> usize {
        self.user_connections.len()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("users", &self.user_connections.len())
            .finish()
    }
}
