//! Event broadcasting
//!
//! Handles distribution of push events to WebSocket connections.

mod dispatcher;

pub use dispatcher::{EventDispatcher, RoutedEvent};
