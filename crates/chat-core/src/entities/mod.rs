//! Domain entities - core business objects

mod conversation;
mod message;
mod presence;
mod reaction;

pub use conversation::{ConversationSummary, LastMessage};
pub use message::{
    DeleteScope, Message, MessagePayload, MessageStatus, PayloadKind, TOMBSTONE_BODY,
};
pub use presence::PresenceState;
pub use reaction::{Reaction, ReactionGroup};
