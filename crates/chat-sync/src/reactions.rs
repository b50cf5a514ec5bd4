//! Reaction reconciler
//!
//! Enforces the per-message reaction rules on a `Message` in place:
//! - at most one reaction per user; setting a new emoji retracts the previous one
//! - at most [`MAX_DISTINCT_EMOJI`] distinct emoji values across all users
//!
//! Rejected operations leave the message untouched.

use chat_core::{DomainError, Message, Reaction, ReactionGroup, Snowflake};

/// Maximum number of distinct emoji values on one message
pub const MAX_DISTINCT_EMOJI: usize = 2;

/// What a successful `set_reaction` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    /// The user already had exactly this reaction
    Unchanged,
    Added,
    /// The user's previous emoji was retracted in the same step
    Replaced { previous: String },
}

impl ReactionChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Check whether `user` may set `emoji` without mutating anything
pub fn check_set(message: &Message, user: Snowflake, emoji: &str) -> Result<(), DomainError> {
    let mut others: Vec<&str> = Vec::with_capacity(MAX_DISTINCT_EMOJI);
    for reaction in message.reactions.iter().filter(|r| r.user_id != user) {
        if !others.contains(&reaction.emoji.as_str()) {
            others.push(&reaction.emoji);
        }
    }

    if !others.contains(&emoji) && others.len() >= MAX_DISTINCT_EMOJI {
        return Err(DomainError::ReactionTypeLimitExceeded {
            message_id: message.id,
        });
    }
    Ok(())
}

/// Set `user`'s reaction to `emoji`, replacing any previous one
pub fn set_reaction(
    message: &mut Message,
    user: Snowflake,
    emoji: &str,
) -> Result<ReactionChange, DomainError> {
    if message.reaction_of(user).is_some_and(|r| r.is_emoji(emoji)) {
        return Ok(ReactionChange::Unchanged);
    }

    check_set(message, user, emoji)?;

    match message.reactions.iter_mut().find(|r| r.user_id == user) {
        Some(existing) => {
            let previous = std::mem::replace(&mut existing.emoji, emoji.to_string());
            Ok(ReactionChange::Replaced { previous })
        }
        None => {
            message.reactions.push(Reaction::new(user, emoji));
            Ok(ReactionChange::Added)
        }
    }
}

/// Remove the `(user, emoji)` pair; returns false if it was not present
pub fn clear_reaction(message: &mut Message, user: Snowflake, emoji: &str) -> bool {
    let before = message.reactions.len();
    message
        .reactions
        .retain(|r| !(r.user_id == user && r.is_emoji(emoji)));
    message.reactions.len() != before
}

/// Put `user`'s reaction back to `value`, used when an optimistic change is compensated
///
/// Falls back to removing the user's reaction if `value` no longer fits the type cap.
pub fn restore_reaction(message: &mut Message, user: Snowflake, value: Option<&str>) -> bool {
    let current = message.reaction_of(user).map(|r| r.emoji.clone());
    if current.as_deref() == value {
        return false;
    }

    if let Some(emoji) = value {
        if set_reaction(message, user, emoji).is_ok() {
            return true;
        }
    }
    message.reactions.retain(|r| r.user_id != user);
    true
}

/// Group reactions by emoji in order of first appearance
pub fn group(reactions: &[Reaction]) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for reaction in reactions {
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => group.user_ids.push(reaction.user_id),
            None => groups.push(ReactionGroup {
                emoji: reaction.emoji.clone(),
                user_ids: vec![reaction.user_id],
            }),
        }
    }
    groups
}
