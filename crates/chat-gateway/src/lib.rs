//! # chat-gateway
//!
//! Push-channel server: a WebSocket gateway speaking the Hello/Identify/Heartbeat protocol,
//! reference-counted presence with heartbeat-window eviction, and fan-out of push events to
//! every live connection of their recipients.

pub mod broadcast;
pub mod connection;
pub mod handlers;
pub mod presence;
pub mod protocol;
pub mod server;

pub use server::{run, serve, GatewayState};
