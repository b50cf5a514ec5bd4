//! Gateway state
//!
//! Application state for the gateway server.

use crate::broadcast::EventDispatcher;
use crate::connection::ConnectionManager;
use crate::presence::PresenceHub;
use chat_common::{GatewayConfig, TokenService};
use std::sync::Arc;

/// Gateway application state
///
/// Holds all shared dependencies for the gateway server.
#[derive(Clone)]
pub struct GatewayState {
    /// Connection manager for WebSocket connections
    connection_manager: Arc<ConnectionManager>,
    /// Reference-counted presence with heartbeat liveness
    presence: Arc<PresenceHub>,
    /// Routes push events to connections
    event_dispatcher: Arc<EventDispatcher>,
    /// Verifies Identify tokens
    tokens: Arc<TokenService>,
    config: Arc<GatewayConfig>,
}

impl GatewayState {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let connection_manager = ConnectionManager::new_shared();
        let event_dispatcher = Arc::new(EventDispatcher::new(connection_manager.clone()));
        Self {
            presence: Arc::new(PresenceHub::new(config.heartbeat_timeout())),
            tokens: Arc::new(TokenService::new(&config.token_secret)),
            connection_manager,
            event_dispatcher,
            config: Arc::new(config),
        }
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    pub fn presence(&self) -> &Arc<PresenceHub> {
        &self.presence
    }

    pub fn event_dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.event_dispatcher
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("connection_manager", &self.connection_manager)
            .field("presence", &self.presence)
            .field("address", &self.config.address())
            .finish_non_exhaustive()
    }
}
