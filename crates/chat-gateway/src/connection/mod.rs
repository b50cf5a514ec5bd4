//! Connection management
//!
//! Tracks live WebSocket connections and routes outgoing messages to them.

mod connection;
mod manager;

pub use connection::{Connection, ConnectionState};
pub use manager::ConnectionManager;
