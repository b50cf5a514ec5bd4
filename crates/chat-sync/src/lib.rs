//! # chat-sync
//!
//! Client-side synchronization core of a two-party chat.
//!
//! Snapshots, push events and local optimistic actions are funnelled through one
//! [`SyncReducer`], which owns the message store, the conversation index, the pending-update
//! buffer and the presence mirror. [`SyncSession`] serializes access to the reducer and
//! executes the backend calls it asks for; [`RestBackend`] and [`PushClient`] connect it to
//! the authoritative backend and the gateway.

pub mod error;
pub mod index;
pub mod pending;
pub mod presence;
pub mod push;
pub mod reactions;
pub mod reducer;
pub mod rest;
pub mod retry;
pub mod session;
pub mod store;

pub use error::{SyncError, SyncResult};
pub use index::ConversationIndex;
pub use push::{PushClient, PushHandle, PushStatus};
pub use reducer::{Applied, LocalAction, SyncEffect, SyncInput, SyncReducer};
pub use rest::RestBackend;
pub use retry::RetryPolicy;
pub use session::SyncSession;
pub use store::MessageStore;
