//! Push events - everything the push channel can deliver to a session
//!
//! Delivery is at-least-once with no ordering guarantee across event kinds, so every
//! consumer must treat each event as possibly duplicated, late, or early.

use serde::{Deserialize, Serialize};

use crate::entities::{DeleteScope, Message, MessageStatus, PresenceState};
use crate::value_objects::{CorrelationToken, Snowflake};

/// All events the push channel carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEvent {
    MessageCreated(MessageCreatedEvent),
    MessageStatusChanged(MessageStatusChangedEvent),
    ReactionChanged(ReactionChangedEvent),
    MessageDeleted(MessageDeletedEvent),
    PresenceChanged(PresenceChangedEvent),
    PresenceSnapshot(PresenceSnapshotEvent),
    ConversationTouched(ConversationTouchedEvent),
}

impl PushEvent {
    /// Dispatch name used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "MESSAGE_CREATED",
            Self::MessageStatusChanged(_) => "MESSAGE_STATUS_CHANGED",
            Self::ReactionChanged(_) => "REACTION_CHANGED",
            Self::MessageDeleted(_) => "MESSAGE_DELETED",
            Self::PresenceChanged(_) => "PRESENCE_CHANGED",
            Self::PresenceSnapshot(_) => "PRESENCE_SNAPSHOT",
            Self::ConversationTouched(_) => "CONVERSATION_TOUCHED",
        }
    }

    /// Conversation the event affects, when it names one directly
    pub fn conversation_id(&self) -> Option<Snowflake> {
        match self {
            Self::MessageCreated(e) => Some(e.message.conversation_id),
            Self::ConversationTouched(e) => Some(e.conversation_id),
            _ => None,
        }
    }
}

// ============================================================================
// Message Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreatedEvent {
    pub message: Message,
    /// Echo of the sender's correlation token; only the sending account sees it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationToken>,
}

impl MessageCreatedEvent {
    pub fn new(message: Message) -> Self {
        let correlation = message.correlation;
        Self {
            message,
            correlation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusChangedEvent {
    pub message_id: Snowflake,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionChangedEvent {
    pub message_id: Snowflake,
    pub action: ReactionAction,
    pub user_id: Snowflake,
    pub emoji: String,
}

/// Single or batch deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeletedEvent {
    pub message_ids: Vec<Snowflake>,
    pub scope: DeleteScope,
}

// ============================================================================
// Presence Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChangedEvent {
    pub user_id: Snowflake,
    pub state: PresenceState,
}

/// Full online-id set; replaces whatever the receiver knew
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshotEvent {
    pub online: Vec<Snowflake>,
}

// ============================================================================
// Conversation Events
// ============================================================================

/// New activity in a conversation the receiver may not have loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTouchedEvent {
    pub conversation_id: Snowflake,
}
