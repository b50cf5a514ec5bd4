//! Push events - the taxonomy delivered by the push channel

mod push_event;

pub use push_event::{
    ConversationTouchedEvent, MessageCreatedEvent, MessageDeletedEvent, MessageStatusChangedEvent,
    PresenceChangedEvent, PresenceSnapshotEvent, PushEvent, ReactionAction, ReactionChangedEvent,
};
