//! # chat-common
//!
//! Shared utilities including configuration, error handling, gateway authentication, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{Claims, TokenService};
pub use config::{
    AppConfig, AppSettings, ConfigError, Environment, GatewayConfig, RetryConfig, SyncConfig,
};
pub use error::{AppError, AppResult, ErrorResponse};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
