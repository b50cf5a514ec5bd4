//! Presence state of a user

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Online,
    Offline,
}

impl PresenceState {
    #[inline]
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}
