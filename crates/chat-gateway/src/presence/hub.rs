//! Presence hub
//!
//! Wraps the [`PresenceRegistry`] with per-connection liveness. Every connection must
//! heartbeat within the window; a connection that stays silent longer is force-disconnected
//! exactly like a regular close. Transitions are published on a broadcast channel in the
//! order the registry produced them.

use std::sync::Arc;
use std::time::Duration;

use chat_core::{PresenceChangedEvent, PresenceState, Snowflake};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::PresenceRegistry;
use crate::connection::ConnectionManager;
use crate::protocol::CloseCode;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Liveness {
    user_id: Snowflake,
    last_heartbeat: Instant,
}

pub struct PresenceHub {
    registry: Mutex<PresenceRegistry>,
    sessions: DashMap<String, Liveness>,
    events: broadcast::Sender<PresenceChangedEvent>,
    timeout: Duration,
}

impl PresenceHub {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            registry: Mutex::new(PresenceRegistry::new()),
            sessions: DashMap::new(),
            events,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Receive every presence transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChangedEvent> {
        self.events.subscribe()
    }

    /// Count an identified connection
    ///
    /// `ready` runs under the registry lock with the online set that includes this user, so
    /// whatever it enqueues is ordered before any transition published afterwards.
    pub fn connect<F>(&self, session_id: &str, user_id: Snowflake, ready: F) -> Option<PresenceChangedEvent>
    where
        F: FnOnce(Vec<Snowflake>),
    {
        let mut registry = self.registry.lock();
        if self.sessions.contains_key(session_id) {
            tracing::warn!(session_id, "Session already counted for presence");
            ready(registry.online_users());
            return None;
        }
        self.sessions.insert(
            session_id.to_string(),
            Liveness {
                user_id,
                last_heartbeat: Instant::now(),
            },
        );

        let transition = registry.connect(user_id).map(|state| self.publish(user_id, state));
        ready(registry.online_users());
        tracing::debug!(
            session_id,
            user_id = %user_id,
            connections = registry.connections(user_id),
            "Presence connection counted"
        );
        transition
    }

    /// Reset the inactivity timer of a session; false if the session is not counted
    pub fn heartbeat(&self, session_id: &str) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(mut liveness) => {
                liveness.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Stop counting a session
    ///
    /// Idempotent: a session already disconnected (closed, or evicted by the sweeper) is
    /// ignored, so it can never decrement twice.
    pub fn disconnect(&self, session_id: &str) -> Option<PresenceChangedEvent> {
        self.release(session_id).flatten()
    }

    /// `None` when the session was not counted, otherwise the transition it caused
    fn release(&self, session_id: &str) -> Option<Option<PresenceChangedEvent>> {
        let mut registry = self.registry.lock();
        let (_, liveness) = self.sessions.remove(session_id)?;
        let transition = registry
            .disconnect(liveness.user_id)
            .map(|state| self.publish(liveness.user_id, state));
        tracing::debug!(
            session_id,
            user_id = %liveness.user_id,
            connections = registry.connections(liveness.user_id),
            "Presence connection released"
        );
        Some(transition)
    }

    /// Disconnect every session silent for longer than the window; returns their ids
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_heartbeat) > self.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter(|session_id| {
                let released = self.release(session_id).is_some();
                if released {
                    tracing::warn!(session_id = %session_id, "Connection missed the heartbeat window");
                }
                released
            })
            .collect()
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.registry.lock().is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<Snowflake> {
        self.registry.lock().online_users()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Periodically evict silent sessions and close their sockets with `SessionTimeout`
    pub fn spawn_sweeper(
        self: Arc<Self>,
        connections: Arc<ConnectionManager>,
        period: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                period_ms = period.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Presence sweeper started"
            );

            loop {
                ticker.tick().await;
                for session_id in self.expire(Instant::now()) {
                    if let Some(connection) = connections.get_connection(&session_id) {
                        connection.close(CloseCode::SessionTimeout);
                    }
                }
            }
        })
    }

    fn publish(&self, user_id: Snowflake, state: PresenceState) -> PresenceChangedEvent {
        let event = PresenceChangedEvent { user_id, state };
        tracing::info!(user_id = %user_id, state = ?state, "Presence changed");
        // No receivers is fine; nobody is connected to hear it
        let _ = self.events.send(event.clone());
        event
    }
}

impl std::fmt::Debug for PresenceHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceHub")
            .field("sessions", &self.sessions.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
