//! Message entity - a single message in a two-party conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::entities::Reaction;
use crate::error::DomainError;
use crate::value_objects::{CorrelationToken, Snowflake};

/// Body shown in place of a message deleted for everyone
pub const TOMBSTONE_BODY: &str = "This message was deleted";

// ============================================================================
// Status
// ============================================================================

/// Delivery status. Ordered: `Sent < Delivered < Read`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Numeric rank used by the monotonic merge
    pub const fn rank(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    /// Apply an update: the result never ranks below either side
    #[inline]
    pub fn merge(self, update: Self) -> Self {
        self.max(update)
    }

    #[inline]
    pub fn is_read(self) -> bool {
        self == Self::Read
    }
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    #[default]
    Text,
    Image,
    Document,
    Gif,
}

impl PayloadKind {
    /// Kinds whose content lives in binary storage
    pub fn requires_attachment(self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Short label used in conversation previews for non-text messages
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Message",
            Self::Image => "Photo",
            Self::Document => "Document",
            Self::Gif => "GIF",
        }
    }
}

/// Message content. The attachment is an opaque reference into external storage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Validate)]
pub struct MessagePayload {
    pub kind: PayloadKind,
    #[validate(length(max = 4000, message = "Message body must be at most 4000 characters"))]
    #[serde(default)]
    pub body: String,
    #[validate(length(min = 1, max = 2048, message = "Attachment reference must be 1-2048 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl MessagePayload {
    /// Plain text payload
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::Text,
            body: body.into(),
            attachment: None,
        }
    }

    /// Non-text payload pointing at stored media
    pub fn media(kind: PayloadKind, attachment: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            kind,
            body: caption.into(),
            attachment: Some(attachment.into()),
        }
    }

    /// Field validation plus the per-kind content rules
    pub fn check(&self) -> Result<(), DomainError> {
        self.validate()?;

        if self.kind.requires_attachment() {
            if self.attachment.is_none() {
                return Err(DomainError::Validation(format!(
                    "{:?} messages require an attachment",
                    self.kind
                )));
            }
        } else if self.body.trim().is_empty() {
            return Err(DomainError::Validation(
                "Message body cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Truncated preview for the conversation list
    pub fn preview(&self, max_chars: usize) -> String {
        if self.kind.requires_attachment() && self.body.trim().is_empty() {
            return self.kind.label().to_string();
        }
        match self.body.char_indices().nth(max_chars) {
            Some((end, _)) => self.body[..end].to_string(),
            None => self.body.clone(),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Deletion scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    /// Hidden for the requesting viewer only
    ForMe,
    /// Tombstoned for both participants
    ForEveryone,
}

impl DeleteScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForMe => "for_me",
            Self::ForEveryone => "for_everyone",
        }
    }
}

/// Message entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub conversation_id: Snowflake,
    pub sender_id: Snowflake,
    pub receiver_id: Snowflake,
    pub payload: MessagePayload,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    /// Per-viewer flag; never visible to the other participant
    #[serde(default)]
    pub deleted_for_me: bool,
    pub created_at: DateTime<Utc>,
    /// Token of the send request that created this message, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationToken>,
}

impl Message {
    /// Create a new Message in `Sent` status
    pub fn new(
        id: Snowflake,
        conversation_id: Snowflake,
        sender_id: Snowflake,
        receiver_id: Snowflake,
        payload: MessagePayload,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            receiver_id,
            payload,
            status: MessageStatus::Sent,
            reactions: Vec::new(),
            deleted_for_everyone: false,
            deleted_for_me: false,
            created_at: Utc::now(),
            correlation: None,
        }
    }

    /// Attach the correlation token of the originating send
    pub fn with_correlation(mut self, token: CorrelationToken) -> Self {
        self.correlation = Some(token);
        self
    }

    /// Apply a status update; returns true if the status advanced
    pub fn apply_status(&mut self, update: MessageStatus) -> bool {
        let merged = self.status.merge(update);
        let changed = merged != self.status;
        self.status = merged;
        changed
    }

    /// Replace the content with the tombstone marker; returns true if it was not already one
    pub fn tombstone(&mut self) -> bool {
        if self.deleted_for_everyone {
            return false;
        }
        self.deleted_for_everyone = true;
        self.payload = MessagePayload::text(TOMBSTONE_BODY);
        self.reactions.clear();
        true
    }

    /// Whether this message counts against `viewer`'s unread total
    #[inline]
    pub fn is_unread_for(&self, viewer: Snowflake) -> bool {
        self.receiver_id == viewer && !self.status.is_read()
    }

    /// The other participant from `viewer`'s point of view
    #[inline]
    pub fn counterpart(&self, viewer: Snowflake) -> Snowflake {
        if self.sender_id == viewer {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Reaction left by `user`, if any
    pub fn reaction_of(&self, user: Snowflake) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user)
    }
}
