//! Gateway server setup
//!
//! Provides the main WebSocket server configuration and routes.

pub mod events;
mod handler;
mod state;

pub use events::{ApiError, PublishResponse};
pub use handler::gateway_handler;
pub use state::GatewayState;

use axum::{
    routing::{get, post},
    Router,
};
use chat_common::{AppConfig, AppError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/events", post(events::publish_event))
        .route("/health", get(health_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Background work every gateway needs: heartbeat sweeping and presence fan-out
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn start(state: &GatewayState) -> Self {
        let period = (state.config().heartbeat_timeout() / 4).max(Duration::from_millis(10));
        let sweeper = state
            .presence()
            .clone()
            .spawn_sweeper(state.connection_manager().clone(), period);
        let fanout = state
            .event_dispatcher()
            .clone()
            .spawn_presence_fanout(state.presence().subscribe());

        Self {
            handles: vec![sweeper, fanout],
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Serve the gateway on an already bound listener
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), AppError> {
    let _background = BackgroundTasks::start(&state);
    let app = create_app(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Gateway listening on ws://{}/gateway", addr);
    }

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!("Server error: {e}")))
}

/// Run the complete gateway server with configuration
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = config.gateway.address();
    tracing::info!("Starting Gateway server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!("Failed to bind to {addr}: {e}")))?;

    serve(listener, GatewayState::new(config.gateway)).await
}
