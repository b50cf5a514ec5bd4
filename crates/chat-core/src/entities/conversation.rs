//! Conversation summary - one row of a user's conversation list

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Message;
use crate::value_objects::Snowflake;

/// Snapshot of the most recent visible message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub message_id: Snowflake,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: Snowflake,
}

impl LastMessage {
    pub fn from_message(message: &Message, preview_chars: usize) -> Self {
        Self {
            message_id: message.id,
            preview: message.payload.preview(preview_chars),
            created_at: message.created_at,
            sender_id: message.sender_id,
        }
    }
}

/// Conversation summary as seen by one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Snowflake,
    pub participant_id: Snowflake,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
    /// Ordering key; most recent first
    pub last_activity: DateTime<Utc>,
}

impl ConversationSummary {
    /// Empty summary for a conversation with no visible messages
    pub fn empty(id: Snowflake, participant_id: Snowflake, last_activity: DateTime<Utc>) -> Self {
        Self {
            id,
            participant_id,
            last_message: None,
            unread_count: 0,
            last_activity,
        }
    }

    /// Subtract `count` from the unread total, floored at zero
    pub fn decrement_unread(&mut self, count: u32) {
        self.unread_count = self.unread_count.saturating_sub(count);
    }
}
