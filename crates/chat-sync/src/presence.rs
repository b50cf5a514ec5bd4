//! Client-side mirror of the gateway's online set

use std::collections::HashSet;

use chat_core::{PresenceState, Snowflake};

/// Online user ids as last reported by the push channel
#[derive(Debug, Default, Clone)]
pub struct PresenceMirror {
    online: HashSet<Snowflake>,
}

impl PresenceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a single transition; returns true if the set changed
    pub fn apply(&mut self, user_id: Snowflake, state: PresenceState) -> bool {
        match state {
            PresenceState::Online => self.online.insert(user_id),
            PresenceState::Offline => self.online.remove(&user_id),
        }
    }

    /// Replace the whole set; returns true if it differs from the previous one
    pub fn replace(&mut self, online: impl IntoIterator<Item = Snowflake>) -> bool {
        let next: HashSet<Snowflake> = online.into_iter().collect();
        let changed = next != self.online;
        self.online = next;
        changed
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.online.contains(&user_id)
    }

    /// Sorted for stable output
    pub fn online_users(&self) -> Vec<Snowflake> {
        let mut users: Vec<_> = self.online.iter().copied().collect();
        users.sort_unstable();
        users
    }
}
