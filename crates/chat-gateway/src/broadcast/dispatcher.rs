//! Event dispatcher
//!
//! Routes push events to the WebSocket connections of their recipients and fans presence
//! transitions out to every identified connection.

use crate::connection::ConnectionManager;
use chat_core::{PresenceChangedEvent, PushEvent, Snowflake};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A push event addressed to a set of users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedEvent {
    pub recipients: Vec<Snowflake>,
    pub event: PushEvent,
}

impl RoutedEvent {
    pub fn new(recipients: impl IntoIterator<Item = Snowflake>, event: PushEvent) -> Self {
        Self {
            recipients: recipients.into_iter().collect(),
            event,
        }
    }
}

/// Event dispatcher that routes push events to WebSocket connections
pub struct EventDispatcher {
    /// Connection manager for sending messages
    connection_manager: Arc<ConnectionManager>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// Deliver an event to every live connection of each recipient
    ///
    /// Returns the number of connections the event was queued on. Recipients without a live
    /// connection miss the event; they heal through a snapshot on their next connect.
    pub async fn publish(&self, routed: &RoutedEvent) -> Result<usize, serde_json::Error> {
        let event_type = routed.event.event_type();
        let data = serde_json::to_value(&routed.event)?;

        // The same user listed twice still gets one copy per connection
        let recipients: BTreeSet<Snowflake> = routed.recipients.iter().copied().collect();

        let mut delivered = 0;
        for user_id in recipients {
            delivered += self
                .connection_manager
                .dispatch_to_user(user_id, event_type, &data)
                .await;
        }

        tracing::debug!(
            event_type,
            recipients = routed.recipients.len(),
            delivered,
            "Event published"
        );

        Ok(delivered)
    }

    /// Deliver an event to every identified connection
    pub async fn broadcast(&self, event: &PushEvent) -> Result<usize, serde_json::Error> {
        let data = serde_json::to_value(event)?;
        Ok(self
            .connection_manager
            .dispatch_to_all(event.event_type(), &data)
            .await)
    }

    /// Forward presence transitions to all identified connections
    pub fn spawn_presence_fanout(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<PresenceChangedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Presence fan-out started");
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.broadcast(&PushEvent::PresenceChanged(event)).await {
                            tracing::error!(error = %e, "Failed to encode presence event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Clients resync the full online set on their next READY
                        tracing::warn!(lagged = n, "Presence fan-out lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Presence channel closed");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("connection_manager", &self.connection_manager)
            .finish()
    }
}
