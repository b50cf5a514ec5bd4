//! Push gateway binary
//!
//! Reads `GATEWAY_*` settings from the environment (or `.env`) and serves the WebSocket push
//! channel, the internal `POST /events` ingress and `GET /health`.

use chat_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid gateway configuration: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        address = %config.gateway.address(),
        heartbeat_interval_ms = config.gateway.heartbeat_interval_ms,
        heartbeat_timeout_ms = config.gateway.heartbeat_timeout_ms,
        "Starting push gateway"
    );

    if let Err(e) = chat_gateway::run(config).await {
        error!(error = %e, "Push gateway stopped");
        std::process::exit(1);
    }
}
