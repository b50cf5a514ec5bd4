//! Server-side presence
//!
//! Reference-counted online tracking with heartbeat-window eviction.

mod hub;
mod registry;

pub use hub::PresenceHub;
pub use registry::PresenceRegistry;
