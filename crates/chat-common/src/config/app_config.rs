//! Application configuration structs
//!
//! Loads configuration from environment variables. Every section also has a `Default`
//! so libraries and tests can be configured without touching the environment.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub sync: SyncConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            other => Err(ConfigError::InvalidValue("APP_ENV", other.to_string())),
        }
    }
}

/// Push-channel server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Interval advertised to clients in HELLO
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is force-disconnected
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// HMAC secret shared with the external credential issuer
    pub token_secret: String,
}

impl GatewayConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            token_secret: String::new(),
        }
    }
}

/// Client-side synchronization configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Maximum number of message ids with buffered updates
    #[serde(default = "default_pending_buffer")]
    pub pending_buffer: usize,
    /// Characters kept in conversation list previews
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            pending_buffer: default_pending_buffer(),
            preview_chars: default_preview_chars(),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load only the client-side section
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            api_url: env::var("SYNC_API_URL").unwrap_or_else(|_| default_api_url()),
            gateway_url: env::var("SYNC_GATEWAY_URL").unwrap_or_else(|_| default_gateway_url()),
            pending_buffer: parse_var("SYNC_PENDING_BUFFER", default_pending_buffer())?,
            preview_chars: parse_var("SYNC_PREVIEW_CHARS", default_preview_chars())?,
            retry: RetryConfig {
                max_attempts: parse_var("SYNC_RETRY_ATTEMPTS", default_retry_attempts())?,
                base_delay_ms: parse_var("SYNC_RETRY_BASE_DELAY_MS", default_retry_base_delay_ms())?,
                max_delay_ms: parse_var("SYNC_RETRY_MAX_DELAY_MS", default_retry_max_delay_ms())?,
            },
        })
    }
}

/// Backoff policy for idempotent reads and reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "chat-sync".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:8081/gateway".to_string()
}

fn default_pending_buffer() -> usize {
    256
}

fn default_preview_chars() -> usize {
    80
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    5_000
}

/// Read an optional variable, falling back to `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: match env::var("APP_ENV") {
                    Ok(raw) => raw.parse()?,
                    Err(_) => Environment::default(),
                },
            },
            gateway: GatewayConfig {
                host: env::var("GATEWAY_HOST").unwrap_or_else(|_| default_host()),
                port: env::var("GATEWAY_PORT")
                    .map_err(|_| ConfigError::MissingVar("GATEWAY_PORT"))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        ConfigError::InvalidValue("GATEWAY_PORT", e.to_string())
                    })?,
                heartbeat_interval_ms: parse_var(
                    "GATEWAY_HEARTBEAT_INTERVAL_MS",
                    default_heartbeat_interval_ms(),
                )?,
                heartbeat_timeout_ms: parse_var(
                    "GATEWAY_HEARTBEAT_TIMEOUT_MS",
                    default_heartbeat_timeout_ms(),
                )?,
                token_secret: env::var("GATEWAY_TOKEN_SECRET")
                    .map_err(|_| ConfigError::MissingVar("GATEWAY_TOKEN_SECRET"))?,
            },
            sync: SyncConfig::from_env()?,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
