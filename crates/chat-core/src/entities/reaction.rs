//! Reaction entity - an emoji left on a message by one participant

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// A single (user, emoji) pair on a message. The owning message holds at most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Snowflake,
    pub emoji: String,
}

impl Reaction {
    /// Create a new Reaction
    pub fn new(user_id: Snowflake, emoji: impl Into<String>) -> Self {
        Self {
            user_id,
            emoji: emoji.into(),
        }
    }

    /// Check if reaction uses a specific emoji
    #[inline]
    pub fn is_emoji(&self, emoji: &str) -> bool {
        self.emoji == emoji
    }
}

/// Display projection: users grouped under one emoji
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub user_ids: Vec<Snowflake>,
}

impl ReactionGroup {
    pub fn count(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether `user` is among the reactors
    pub fn includes(&self, user: Snowflake) -> bool {
        self.user_ids.contains(&user)
    }
}
