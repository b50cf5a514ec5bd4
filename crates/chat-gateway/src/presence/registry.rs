//! Reference-counted presence registry
//!
//! A user is online while at least one of their connections is open. The registry only
//! counts; timers and fan-out live in [`super::PresenceHub`].

use std::collections::HashMap;

use chat_core::{PresenceState, Snowflake};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    counts: HashMap<Snowflake, u32>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection; returns `Online` on the 0 -> 1 transition
    pub fn connect(&mut self, user_id: Snowflake) -> Option<PresenceState> {
        let count = self.counts.entry(user_id).or_insert(0);
        *count += 1;
        (*count == 1).then_some(PresenceState::Online)
    }

    /// Drop a connection; returns `Offline` on the 1 -> 0 transition
    ///
    /// Disconnecting a user with no counted connections is a no-op.
    pub fn disconnect(&mut self, user_id: Snowflake) -> Option<PresenceState> {
        let count = self.counts.get_mut(&user_id)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        self.counts.remove(&user_id);
        Some(PresenceState::Offline)
    }

    pub fn connections(&self, user_id: Snowflake) -> u32 {
        self.counts.get(&user_id).copied().unwrap_or(0)
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.counts.contains_key(&user_id)
    }

    /// Online user ids, ascending
    pub fn online_users(&self) -> Vec<Snowflake> {
        let mut users: Vec<_> = self.counts.keys().copied().collect();
        users.sort_unstable();
        users
    }
}
