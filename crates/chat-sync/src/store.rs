//! Message store
//!
//! One ordered, deduplicated log per conversation plus the bookkeeping the reducer needs
//! to reconcile optimistic entries: pending sends keyed by correlation token, a local read
//! overlay, ids hidden for the viewer, and snapshot generations.
//!
//! Confirmed messages are kept sorted by `(created_at, id)`. Pending sends carry negative
//! local ids and are listed after confirmed messages.

use std::collections::{HashMap, HashSet};

use chat_core::{CorrelationToken, Message, MessagePayload, MessageStatus, Snowflake};
use chrono::Utc;

/// An optimistic send awaiting its acknowledgment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub token: CorrelationToken,
    pub message: Message,
}

/// Result of inserting a confirmed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Already present; `changed` reports whether the merge advanced anything
    Duplicate {
        changed: bool,
        /// The redelivered status made an inbound message read
        became_read: bool,
        /// The redelivered copy was deleted for everyone
        tombstoned: bool,
        /// Counted as unread right before the tombstone
        was_unread: bool,
    },
    /// Deleted for the viewer earlier; never resurrected
    Hidden,
}

/// Result of a status update on a known message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub conversation_id: Snowflake,
    pub changed: bool,
    /// An inbound message became read from the viewer's point of view
    pub became_read: bool,
}

/// Result of a global deletion on a known message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstoned {
    pub conversation_id: Snowflake,
    pub changed: bool,
    /// The message counted as unread for the viewer before deletion
    pub was_unread: bool,
}

#[derive(Debug)]
pub struct ConversationLog {
    id: Snowflake,
    messages: Vec<Message>,
    pending: Vec<PendingSend>,
    /// Locally read messages: id -> last confirmed status underneath
    read_overlay: HashMap<Snowflake, MessageStatus>,
    complete: bool,
    issued_generation: u64,
    arrived_since_request: HashSet<Snowflake>,
}

impl ConversationLog {
    fn new(id: Snowflake) -> Self {
        Self {
            id,
            messages: Vec::new(),
            pending: Vec::new(),
            read_overlay: HashMap::new(),
            complete: false,
            issued_generation: 0,
            arrived_since_request: HashSet::new(),
        }
    }

    pub fn id(&self) -> Snowflake {
        self.id
    }

    /// Whether the log was populated from an authoritative snapshot
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Confirmed messages in display order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    pub fn get(&self, id: Snowflake) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Confirmed messages followed by pending sends
    pub fn view(&self) -> Vec<Message> {
        self.messages
            .iter()
            .cloned()
            .chain(self.pending.iter().map(|p| p.message.clone()))
            .collect()
    }

    /// Most recent message that may appear as the conversation preview
    pub fn latest_visible(&self) -> Option<&Message> {
        let confirmed = self.messages.iter().rev().find(|m| !m.deleted_for_everyone);
        let pending = self.pending.last().map(|p| &p.message);
        match (confirmed, pending) {
            (Some(c), Some(p)) => Some(if p.created_at >= c.created_at { p } else { c }),
            (c, p) => c.or(p),
        }
    }

    /// Messages addressed to `viewer` that are not read
    pub fn unread_for(&self, viewer: Snowflake) -> u32 {
        self.messages
            .iter()
            .filter(|m| !m.deleted_for_everyone && m.is_unread_for(viewer))
            .count() as u32
    }

    /// Newest confirmed activity, ignoring pending sends
    pub fn last_confirmed_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.messages.last().map(|m| m.created_at)
    }

    fn position(&self, id: Snowflake) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn get_mut(&mut self, id: Snowflake) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn insert_sorted(&mut self, message: Message) {
        let key = (message.created_at, message.id);
        let at = self
            .messages
            .partition_point(|m| (m.created_at, m.id) <= key);
        self.messages.insert(at, message);
    }

    /// Merge a status update, honouring the read overlay
    fn merge_status(
        &mut self,
        id: Snowflake,
        status: MessageStatus,
        viewer: Snowflake,
    ) -> Option<StatusChange> {
        let conversation_id = self.id;
        if let Some(confirmed) = self.read_overlay.get_mut(&id) {
            let merged = confirmed.merge(status);
            let changed = merged != *confirmed;
            *confirmed = merged;
            return Some(StatusChange {
                conversation_id,
                changed,
                became_read: false,
            });
        }

        let message = self.get_mut(id)?;
        let was_read = message.status.is_read();
        let changed = message.apply_status(status);
        Some(StatusChange {
            conversation_id,
            changed,
            became_read: changed
                && !was_read
                && message.status.is_read()
                && message.receiver_id == viewer
                && !message.deleted_for_everyone,
        })
    }
}

/// All conversation logs of one viewer
#[derive(Debug)]
pub struct MessageStore {
    viewer: Snowflake,
    logs: HashMap<Snowflake, ConversationLog>,
    /// message id -> conversation id
    locations: HashMap<Snowflake, Snowflake>,
    /// Ids deleted for the viewer
    hidden: HashSet<Snowflake>,
    pending_tokens: HashMap<CorrelationToken, Snowflake>,
    next_local_id: i64,
}

impl MessageStore {
    pub fn new(viewer: Snowflake) -> Self {
        Self {
            viewer,
            logs: HashMap::new(),
            locations: HashMap::new(),
            hidden: HashSet::new(),
            pending_tokens: HashMap::new(),
            next_local_id: 0,
        }
    }

    pub fn viewer(&self) -> Snowflake {
        self.viewer
    }

    pub fn log(&self, conversation_id: Snowflake) -> Option<&ConversationLog> {
        self.logs.get(&conversation_id)
    }

    /// Conversations with a log, loaded or partial
    pub fn conversation_ids(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.logs.keys().copied()
    }

    /// Conversation holding `message_id`, if the message is known
    pub fn locate(&self, message_id: Snowflake) -> Option<Snowflake> {
        self.locations.get(&message_id).copied()
    }

    pub fn message(&self, message_id: Snowflake) -> Option<&Message> {
        let conversation_id = self.locate(message_id)?;
        self.logs.get(&conversation_id)?.get(message_id)
    }

    pub(crate) fn message_mut(&mut self, message_id: Snowflake) -> Option<&mut Message> {
        let conversation_id = self.locate(message_id)?;
        self.logs.get_mut(&conversation_id)?.get_mut(message_id)
    }

    pub fn is_hidden(&self, message_id: Snowflake) -> bool {
        self.hidden.contains(&message_id)
    }

    fn log_mut(&mut self, conversation_id: Snowflake) -> &mut ConversationLog {
        self.logs
            .entry(conversation_id)
            .or_insert_with(|| ConversationLog::new(conversation_id))
    }

    // ========================================================================
    // Confirmed messages
    // ========================================================================

    /// Insert a confirmed message unless it is already present or hidden
    pub(crate) fn insert(&mut self, message: Message) -> InsertOutcome {
        if self.hidden.contains(&message.id) {
            return InsertOutcome::Hidden;
        }

        if let Some(conversation_id) = self.locate(message.id) {
            let viewer = self.viewer;
            let log = self.log_mut(conversation_id);
            let status = log.merge_status(message.id, message.status, viewer);
            let status_changed = status.is_some_and(|c| c.changed);
            let became_read = status.is_some_and(|c| c.became_read);

            let mut was_unread = false;
            let mut tombstoned = false;
            if message.deleted_for_everyone {
                if let Some(existing) = log.get_mut(message.id) {
                    was_unread = !existing.deleted_for_everyone && existing.is_unread_for(viewer);
                    tombstoned = existing.tombstone();
                }
                if tombstoned {
                    log.read_overlay.remove(&message.id);
                }
            }
            return InsertOutcome::Duplicate {
                changed: status_changed || tombstoned,
                became_read,
                tombstoned,
                was_unread: tombstoned && was_unread,
            };
        }

        self.locations.insert(message.id, message.conversation_id);
        let log = self.log_mut(message.conversation_id);
        log.arrived_since_request.insert(message.id);
        log.insert_sorted(message);
        InsertOutcome::Inserted
    }

    /// Apply a status update to a known message; `None` if the message is unknown
    pub(crate) fn apply_status(
        &mut self,
        message_id: Snowflake,
        status: MessageStatus,
    ) -> Option<StatusChange> {
        let conversation_id = self.locate(message_id)?;
        let viewer = self.viewer;
        self.logs
            .get_mut(&conversation_id)?
            .merge_status(message_id, status, viewer)
    }

    /// Replace content with the tombstone; `None` if the message is unknown
    pub(crate) fn tombstone(&mut self, message_id: Snowflake) -> Option<Tombstoned> {
        let viewer = self.viewer;
        let conversation_id = self.locate(message_id)?;
        let log = self.logs.get_mut(&conversation_id)?;
        log.read_overlay.remove(&message_id);
        let message = log.get_mut(message_id)?;
        let was_unread = !message.deleted_for_everyone && message.is_unread_for(viewer);
        let changed = message.tombstone();
        Some(Tombstoned {
            conversation_id,
            changed,
            was_unread: changed && was_unread,
        })
    }

    /// Hide a message for the viewer and drop it from its log
    ///
    /// The id is remembered even when the message is not loaded, so a late
    /// `MessageCreated` or a stale snapshot cannot bring it back.
    pub(crate) fn hide(&mut self, message_id: Snowflake) -> Option<Message> {
        self.hidden.insert(message_id);
        let conversation_id = self.locations.remove(&message_id)?;
        let log = self.logs.get_mut(&conversation_id)?;
        log.read_overlay.remove(&message_id);
        log.arrived_since_request.remove(&message_id);
        let at = log.position(message_id)?;
        let mut message = log.messages.remove(at);
        message.deleted_for_me = true;
        Some(message)
    }

    // ========================================================================
    // Pending sends
    // ========================================================================

    /// Add an optimistic entry with a temporary local id
    pub(crate) fn begin_send(
        &mut self,
        conversation_id: Snowflake,
        receiver_id: Snowflake,
        payload: MessagePayload,
        token: CorrelationToken,
    ) -> Message {
        self.next_local_id -= 1;
        let message = Message::new(
            Snowflake::new(self.next_local_id),
            conversation_id,
            self.viewer,
            receiver_id,
            payload,
        )
        .with_correlation(token);

        self.pending_tokens.insert(token, conversation_id);
        self.log_mut(conversation_id).pending.push(PendingSend {
            token,
            message: message.clone(),
        });
        message
    }

    /// Remove the pending entry for `token`
    pub(crate) fn take_pending(&mut self, token: CorrelationToken) -> Option<PendingSend> {
        let conversation_id = self.pending_tokens.remove(&token)?;
        let log = self.logs.get_mut(&conversation_id)?;
        let at = log.pending.iter().position(|p| p.token == token)?;
        Some(log.pending.remove(at))
    }

    pub fn has_pending(&self, token: CorrelationToken) -> bool {
        self.pending_tokens.contains_key(&token)
    }

    // ========================================================================
    // Local read overlay
    // ========================================================================

    /// Mark every unread inbound message of the conversation as read locally
    pub(crate) fn mark_read_local(&mut self, conversation_id: Snowflake) -> Vec<Snowflake> {
        let viewer = self.viewer;
        let Some(log) = self.logs.get_mut(&conversation_id) else {
            return Vec::new();
        };

        let mut marked = Vec::new();
        for message in &mut log.messages {
            if message.deleted_for_everyone || !message.is_unread_for(viewer) {
                continue;
            }
            log.read_overlay.insert(message.id, message.status);
            message.status = MessageStatus::Read;
            marked.push(message.id);
        }
        marked
    }

    /// Drop the overlay for a message; on failure the confirmed status shows again
    ///
    /// Returns the conversation id and whether the message is unread again.
    pub(crate) fn settle_read(
        &mut self,
        message_id: Snowflake,
        ok: bool,
    ) -> Option<(Snowflake, bool)> {
        let conversation_id = self.locate(message_id)?;
        let log = self.logs.get_mut(&conversation_id)?;
        let confirmed = log.read_overlay.remove(&message_id)?;
        let message = log.get_mut(message_id)?;

        if ok {
            message.status = MessageStatus::Read;
            return Some((conversation_id, false));
        }
        message.status = confirmed;
        Some((conversation_id, !confirmed.is_read()))
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Start a snapshot request; results of earlier requests become stale
    pub(crate) fn issue_snapshot(&mut self, conversation_id: Snowflake) -> u64 {
        let log = self.log_mut(conversation_id);
        log.issued_generation += 1;
        log.arrived_since_request.clear();
        log.issued_generation
    }

    /// Replace a conversation's confirmed messages with an authoritative list
    ///
    /// Returns the ids now present, or `None` if `generation` is stale. Status never
    /// regresses, tombstones stick, hidden ids stay hidden, messages that arrived after the
    /// request was issued are kept, and pending sends survive unless the snapshot already
    /// contains their token.
    pub(crate) fn replace_snapshot(
        &mut self,
        conversation_id: Snowflake,
        generation: u64,
        incoming: Vec<Message>,
    ) -> Option<Vec<Snowflake>> {
        let hidden = &self.hidden;
        let log = self
            .logs
            .entry(conversation_id)
            .or_insert_with(|| ConversationLog::new(conversation_id));
        if generation < log.issued_generation {
            return None;
        }

        let mut previous: HashMap<Snowflake, Message> =
            log.messages.drain(..).map(|m| (m.id, m)).collect();
        let mut next: Vec<Message> = Vec::with_capacity(incoming.len());

        for mut message in incoming {
            if hidden.contains(&message.id) {
                continue;
            }
            if let Some(local) = previous.remove(&message.id) {
                match log.read_overlay.get_mut(&message.id) {
                    Some(confirmed) => {
                        *confirmed = confirmed.merge(message.status);
                        message.status = MessageStatus::Read;
                    }
                    None => message.status = message.status.merge(local.status),
                }
                if local.deleted_for_everyone {
                    message.tombstone();
                }
            }
            next.push(message);
        }

        // Pushes that raced the request
        for (id, message) in previous {
            if log.arrived_since_request.contains(&id) {
                next.push(message);
            }
        }

        let acknowledged: HashSet<CorrelationToken> =
            next.iter().filter_map(|m| m.correlation).collect();
        log.pending.retain(|p| !acknowledged.contains(&p.token));
        self.pending_tokens.retain(|t, _| !acknowledged.contains(t));

        next.sort_by_key(|m| (m.created_at, m.id));
        let present: Vec<Snowflake> = next.iter().map(|m| m.id).collect();
        log.read_overlay.retain(|id, _| present.contains(id));
        log.messages = next;
        log.complete = true;
        log.arrived_since_request.clear();

        self.locations.retain(|_, c| *c != conversation_id);
        for id in &present {
            self.locations.insert(*id, conversation_id);
        }
        Some(present)
    }
}
