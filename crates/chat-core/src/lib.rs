//! # chat-core
//!
//! Domain layer for the two-party chat sync core: entities, value objects, the push event
//! taxonomy, domain errors, and the backend port consumed by the synchronization layer.
//! This crate has zero dependencies on infrastructure (network, runtime, storage).

pub mod entities;
pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    ConversationSummary, DeleteScope, LastMessage, Message, MessagePayload, MessageStatus,
    PayloadKind, PresenceState, Reaction, ReactionGroup, TOMBSTONE_BODY,
};
pub use error::DomainError;
pub use events::{
    ConversationTouchedEvent, MessageCreatedEvent, MessageDeletedEvent,
    MessageStatusChangedEvent, PresenceChangedEvent, PresenceSnapshotEvent, PushEvent,
    ReactionAction, ReactionChangedEvent,
};
pub use traits::{BackendResult, SyncBackend};
pub use value_objects::{CorrelationToken, Snowflake, SnowflakeGenerator, SnowflakeParseError};
