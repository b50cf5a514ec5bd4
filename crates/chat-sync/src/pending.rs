//! Bounded buffer of updates for messages not yet in the store
//!
//! Keyed by message id and bounded by key count. When full, the oldest key is evicted;
//! whatever it held is recovered by the next snapshot of its conversation.

use std::collections::{HashMap, VecDeque};

use chat_core::{DeleteScope, MessageStatus, ReactionAction, Snowflake};
use tracing::warn;

/// A buffered reaction change or deletion, replayed in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    Reaction {
        action: ReactionAction,
        user_id: Snowflake,
        emoji: String,
    },
    Delete(DeleteScope),
}

/// Everything buffered for one message id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUpdates {
    /// Highest status seen so far
    pub status: Option<MessageStatus>,
    pub ops: Vec<PendingOp>,
}

#[derive(Debug)]
pub struct PendingBuffer {
    capacity: usize,
    order: VecDeque<Snowflake>,
    entries: HashMap<Snowflake, PendingUpdates>,
    evicted: u64,
}

impl PendingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
            evicted: 0,
        }
    }

    /// Buffer a status update; only the highest rank is kept
    pub fn push_status(&mut self, message_id: Snowflake, status: MessageStatus) {
        let entry = self.entry(message_id);
        entry.status = Some(entry.status.map_or(status, |s| s.merge(status)));
    }

    /// Buffer a reaction change or deletion
    pub fn push_op(&mut self, message_id: Snowflake, op: PendingOp) {
        self.entry(message_id).ops.push(op);
    }

    /// Remove and return everything buffered for `message_id`
    pub fn take(&mut self, message_id: Snowflake) -> Option<PendingUpdates> {
        let updates = self.entries.remove(&message_id)?;
        self.order.retain(|id| *id != message_id);
        Some(updates)
    }

    pub fn contains(&self, message_id: Snowflake) -> bool {
        self.entries.contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of message ids dropped because the buffer was full
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn entry(&mut self, message_id: Snowflake) -> &mut PendingUpdates {
        if !self.entries.contains_key(&message_id) {
            while self.entries.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                self.evicted += 1;
                warn!(
                    message_id = %oldest,
                    capacity = self.capacity,
                    "Pending update buffer full, dropping oldest entry"
                );
            }
            self.order.push_back(message_id);
        }
        self.entries.entry(message_id).or_default()
    }
}
