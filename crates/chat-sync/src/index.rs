//! Conversation index
//!
//! Ordered conversation summaries of one viewer, most recent activity first. Summaries of
//! conversations whose log came from a snapshot are derived from that log; the rest are
//! adjusted incrementally and corrected by the next targeted fetch.

use std::collections::HashMap;

use chat_core::{ConversationSummary, LastMessage, Message, Snowflake};
use chrono::{DateTime, Utc};

use crate::store::ConversationLog;

/// What an incremental update did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexUpdate {
    pub changed: bool,
    /// The summary can no longer be derived locally and should be fetched
    pub needs_fetch: bool,
}

#[derive(Debug)]
pub struct ConversationIndex {
    viewer: Snowflake,
    preview_chars: usize,
    order: Vec<Snowflake>,
    summaries: HashMap<Snowflake, ConversationSummary>,
}

impl ConversationIndex {
    pub fn new(viewer: Snowflake, preview_chars: usize) -> Self {
        Self {
            viewer,
            preview_chars,
            order: Vec::new(),
            summaries: HashMap::new(),
        }
    }

    /// Summaries in display order
    pub fn list(&self) -> Vec<ConversationSummary> {
        self.order
            .iter()
            .filter_map(|id| self.summaries.get(id).cloned())
            .collect()
    }

    pub fn get(&self, id: Snowflake) -> Option<&ConversationSummary> {
        self.summaries.get(&id)
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.summaries.contains_key(&id)
    }

    pub fn position(&self, id: Snowflake) -> Option<usize> {
        self.order.iter().position(|c| *c == id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ========================================================================
    // Authoritative updates
    // ========================================================================

    /// Replace everything with a fetched list
    pub fn replace_all(&mut self, mut summaries: Vec<ConversationSummary>) {
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        self.order = summaries.iter().map(|s| s.id).collect();
        self.summaries = summaries.into_iter().map(|s| (s.id, s)).collect();
    }

    /// Insert or replace one fetched summary; returns true if anything changed
    pub fn upsert(&mut self, summary: ConversationSummary) -> bool {
        let id = summary.id;
        match self.summaries.get(&id) {
            Some(existing) if *existing == summary => false,
            Some(existing) => {
                let bumped = summary.last_activity > existing.last_activity;
                self.summaries.insert(id, summary);
                if bumped {
                    self.move_to_front(id);
                }
                true
            }
            None => {
                let at = self.order.partition_point(|other| {
                    self.summaries
                        .get(other)
                        .is_some_and(|s| s.last_activity >= summary.last_activity)
                });
                self.order.insert(at, id);
                self.summaries.insert(id, summary);
                true
            }
        }
    }

    /// Insert a placeholder at the front if the conversation is unknown
    ///
    /// Returns true when a placeholder was inserted and a targeted fetch is due.
    pub fn ensure(&mut self, id: Snowflake, participant_id: Snowflake) -> bool {
        if self.summaries.contains_key(&id) {
            return false;
        }
        self.summaries.insert(
            id,
            ConversationSummary::empty(id, participant_id, DateTime::<Utc>::MIN_UTC),
        );
        self.order.insert(0, id);
        true
    }

    /// Recompute preview and unread count from a snapshot-backed log
    pub fn derive(&mut self, log: &ConversationLog) -> bool {
        let Some(summary) = self.summaries.get_mut(&log.id()) else {
            return false;
        };

        let latest = log.latest_visible();
        let last_message = latest.map(|m| LastMessage::from_message(m, self.preview_chars));
        let unread_count = log.unread_for(self.viewer);
        let bumped = latest.is_some_and(|m| m.created_at > summary.last_activity);

        let changed = bumped
            || summary.last_message != last_message
            || summary.unread_count != unread_count;
        summary.last_message = last_message;
        summary.unread_count = unread_count;
        if let Some(m) = latest.filter(|_| bumped) {
            summary.last_activity = m.created_at;
        }

        if bumped {
            self.move_to_front(log.id());
        }
        changed
    }

    // ========================================================================
    // Incremental updates (partial logs)
    // ========================================================================

    /// Account for a message newer than anything the summary reflects
    pub fn note_message(&mut self, message: &Message) -> bool {
        let viewer = self.viewer;
        let Some(summary) = self.summaries.get_mut(&message.conversation_id) else {
            return false;
        };
        if message.created_at <= summary.last_activity || message.deleted_for_everyone {
            return false;
        }

        summary.last_activity = message.created_at;
        summary.last_message = Some(LastMessage::from_message(message, self.preview_chars));
        if message.is_unread_for(viewer) {
            summary.unread_count += 1;
        }
        self.move_to_front(message.conversation_id);
        true
    }

    /// Subtract read transitions, floored at zero
    pub fn note_read(&mut self, id: Snowflake, count: u32) -> bool {
        match self.summaries.get_mut(&id) {
            Some(summary) if count > 0 && summary.unread_count > 0 => {
                summary.decrement_unread(count);
                true
            }
            _ => false,
        }
    }

    /// Add back messages whose local read was rolled back
    pub fn note_unread(&mut self, id: Snowflake, count: u32) -> bool {
        match self.summaries.get_mut(&id) {
            Some(summary) if count > 0 => {
                summary.unread_count = summary.unread_count.saturating_add(count);
                true
            }
            _ => false,
        }
    }

    /// A message left the visible set (tombstoned, hidden, or a failed pending send)
    ///
    /// `replacement` is the newest remaining visible message the caller knows of.
    pub fn note_removed(
        &mut self,
        id: Snowflake,
        message_id: Snowflake,
        was_unread: bool,
        replacement: Option<&Message>,
    ) -> IndexUpdate {
        let preview_chars = self.preview_chars;
        let Some(summary) = self.summaries.get_mut(&id) else {
            return IndexUpdate::default();
        };

        let mut update = IndexUpdate::default();
        if was_unread && summary.unread_count > 0 {
            summary.decrement_unread(1);
            update.changed = true;
        }
        if summary
            .last_message
            .as_ref()
            .is_some_and(|last| last.message_id == message_id)
        {
            summary.last_message = replacement.map(|m| LastMessage::from_message(m, preview_chars));
            update.changed = true;
            update.needs_fetch = replacement.is_none();
        }
        update
    }

    fn move_to_front(&mut self, id: Snowflake) {
        if let Some(at) = self.position(id) {
            if at > 0 {
                self.order.remove(at);
                self.order.insert(0, id);
            }
        }
    }
}
