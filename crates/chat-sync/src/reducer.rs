//! Sync reducer - the single mutation surface of the client state
//!
//! Snapshots, push events and local optimistic actions all enter through
//! [`SyncReducer::apply`]. Every rule is idempotent and order-tolerant: no input assumes
//! any other input already happened. The reducer never performs I/O; work that needs the
//! backend is returned as [`SyncEffect`]s for the session to execute.

use std::collections::HashMap;

use chat_core::{
    ConversationSummary, CorrelationToken, DeleteScope, DomainError, Message, MessagePayload,
    MessageStatus, PushEvent, ReactionAction, ReactionChangedEvent, ReactionGroup, Snowflake,
};
use tracing::{debug, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::index::ConversationIndex;
use crate::pending::{PendingBuffer, PendingOp, PendingUpdates};
use crate::presence::PresenceMirror;
use crate::reactions;
use crate::store::{InsertOutcome, MessageStore};

// ============================================================================
// Inputs
// ============================================================================

/// Everything that can change the client state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncInput {
    /// Reserve a generation for a snapshot request
    BeginSnapshot { conversation_id: Snowflake },
    /// Authoritative message list; ignored if `generation` is no longer the latest
    Snapshot {
        conversation_id: Snowflake,
        generation: u64,
        messages: Vec<Message>,
    },
    ConversationList(Vec<ConversationSummary>),
    ConversationFetched(ConversationSummary),
    Push(PushEvent),
    Local(LocalAction),
}

/// Phases of the optimistic protocols
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    BeginSend {
        conversation_id: Snowflake,
        receiver_id: Snowflake,
        payload: MessagePayload,
        token: CorrelationToken,
    },
    ConfirmSend {
        token: CorrelationToken,
        message: Message,
    },
    FailSend {
        token: CorrelationToken,
    },
    BeginReaction {
        message_id: Snowflake,
        emoji: String,
    },
    BeginClearReaction {
        message_id: Snowflake,
        emoji: String,
    },
    /// Outcome of the backend call issued for `request`
    SettleReaction {
        message_id: Snowflake,
        request: u64,
        ok: bool,
    },
    BeginMarkRead {
        conversation_id: Snowflake,
    },
    SettleMarkRead {
        message_id: Snowflake,
        ok: bool,
    },
    /// Deletion acknowledged by the backend
    ConfirmDelete {
        message_ids: Vec<Snowflake>,
        scope: DeleteScope,
    },
}

/// Work the session must perform on the reducer's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEffect {
    /// Targeted summary fetch for one conversation
    FetchConversation(Snowflake),
    /// Re-snapshot one conversation
    Resync(Snowflake),
    SendMessage {
        conversation_id: Snowflake,
        payload: MessagePayload,
        token: CorrelationToken,
    },
    SendStatus {
        message_id: Snowflake,
        status: MessageStatus,
    },
    SendReaction {
        message_id: Snowflake,
        emoji: String,
        request: u64,
    },
    ClearReaction {
        message_id: Snowflake,
        emoji: String,
        request: u64,
    },
}

/// Outcome of one `apply`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub changed: bool,
    pub effects: Vec<SyncEffect>,
    /// Set by `BeginSnapshot`
    pub generation: Option<u64>,
}

impl Applied {
    fn effect(&mut self, effect: SyncEffect) {
        if !self.effects.contains(&effect) {
            self.effects.push(effect);
        }
    }
}

/// The viewer's own reaction changes awaiting acknowledgment on one message
#[derive(Debug, Clone)]
struct ReactionFlight {
    /// Value to fall back to: the newest acknowledged one, or the one before the first request
    prior: Option<String>,
    /// Value of the newest request
    intended: Option<String>,
    /// Unsettled requests and the value each one sets
    requests: Vec<(u64, Option<String>)>,
    latest: u64,
    acknowledged: u64,
    /// A push changed the viewer's reaction to something else meanwhile
    superseded: bool,
}

// ============================================================================
// Reducer
// ============================================================================

#[derive(Debug)]
pub struct SyncReducer {
    viewer: Snowflake,
    store: MessageStore,
    index: ConversationIndex,
    pending: PendingBuffer,
    presence: PresenceMirror,
    flights: HashMap<Snowflake, ReactionFlight>,
    next_request: u64,
    revision: u64,
}

impl SyncReducer {
    pub fn new(viewer: Snowflake, pending_capacity: usize, preview_chars: usize) -> Self {
        Self {
            viewer,
            store: MessageStore::new(viewer),
            index: ConversationIndex::new(viewer, preview_chars),
            pending: PendingBuffer::new(pending_capacity),
            presence: PresenceMirror::new(),
            flights: HashMap::new(),
            next_request: 0,
            revision: 0,
        }
    }

    /// Apply one input
    ///
    /// Errors are returned only for rejected local actions; the state is unchanged then.
    pub fn apply(&mut self, input: SyncInput) -> SyncResult<Applied> {
        let mut out = Applied::default();

        match input {
            SyncInput::BeginSnapshot { conversation_id } => {
                out.generation = Some(self.store.issue_snapshot(conversation_id));
            }
            SyncInput::Snapshot {
                conversation_id,
                generation,
                messages,
            } => self.on_snapshot(conversation_id, generation, messages, &mut out),
            SyncInput::ConversationList(summaries) => {
                self.index.replace_all(summaries);
                let loaded = self.loaded_conversations();
                for conversation_id in loaded {
                    self.refresh_index(conversation_id);
                }
                out.changed = true;
            }
            SyncInput::ConversationFetched(summary) => {
                let conversation_id = summary.id;
                out.changed |= self.index.upsert(summary);
                out.changed |= self.refresh_index(conversation_id);
            }
            SyncInput::Push(event) => self.on_push(event, &mut out),
            SyncInput::Local(action) => self.on_local(action, &mut out)?,
        }

        if out.changed {
            self.revision += 1;
        }
        Ok(out)
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn viewer(&self) -> Snowflake {
        self.viewer
    }

    /// Confirmed messages followed by pending sends
    pub fn messages(&self, conversation_id: Snowflake) -> Vec<Message> {
        self.store
            .log(conversation_id)
            .map(crate::store::ConversationLog::view)
            .unwrap_or_default()
    }

    pub fn message(&self, message_id: Snowflake) -> Option<&Message> {
        self.store.message(message_id)
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.index.list()
    }

    pub fn conversation(&self, conversation_id: Snowflake) -> Option<&ConversationSummary> {
        self.index.get(conversation_id)
    }

    pub fn reaction_groups(&self, message_id: Snowflake) -> Vec<ReactionGroup> {
        self.store
            .message(message_id)
            .map(|m| reactions::group(&m.reactions))
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<Snowflake> {
        self.presence.online_users()
    }

    /// Conversations backed by a snapshot
    pub fn loaded_conversations(&self) -> Vec<Snowflake> {
        self.store
            .conversation_ids()
            .filter(|id| self.store.log(*id).is_some_and(|l| l.is_complete()))
            .collect()
    }

    /// Message ids dropped from the pending buffer so far
    pub fn evicted(&self) -> u64 {
        self.pending.evicted()
    }

    /// Incremented once per state-changing input
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_pending_send(&self, token: CorrelationToken) -> bool {
        self.store.has_pending(token)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    fn on_snapshot(
        &mut self,
        conversation_id: Snowflake,
        generation: u64,
        messages: Vec<Message>,
        out: &mut Applied,
    ) {
        let count = messages.len();
        let participant = messages.first().map(|m| m.counterpart(self.viewer));

        let Some(present) = self
            .store
            .replace_snapshot(conversation_id, generation, messages)
        else {
            debug!(conversation_id = %conversation_id, generation, "Ignoring superseded snapshot");
            return;
        };
        out.changed = true;
        debug!(conversation_id = %conversation_id, generation, count, "Applied snapshot");

        for message_id in present {
            if let Some(updates) = self.pending.take(message_id) {
                if let Some(status) = updates.status {
                    self.store.apply_status(message_id, status);
                }
                if let Some(message) = self.store.message_mut(message_id) {
                    if replay_ops(message, updates.ops) {
                        out.effect(SyncEffect::Resync(conversation_id));
                    }
                }
            }
        }

        match participant {
            Some(participant) => {
                if self.index.ensure(conversation_id, participant) {
                    out.effect(SyncEffect::FetchConversation(conversation_id));
                }
            }
            None if !self.index.contains(conversation_id) => {
                out.effect(SyncEffect::FetchConversation(conversation_id));
            }
            None => {}
        }
        self.refresh_index(conversation_id);
    }

    // ========================================================================
    // Push events
    // ========================================================================

    fn on_push(&mut self, event: PushEvent, out: &mut Applied) {
        trace!(event_type = event.event_type(), "Applying push event");

        match event {
            PushEvent::MessageCreated(e) => {
                let token = e.correlation.or(e.message.correlation);
                self.on_message_created(e.message, token, out);
            }
            PushEvent::MessageStatusChanged(e) => self.on_status(e.message_id, e.status, out),
            PushEvent::ReactionChanged(e) => self.on_reaction(e, out),
            PushEvent::MessageDeleted(e) => self.on_deleted(&e.message_ids, e.scope, out),
            PushEvent::PresenceChanged(e) => {
                out.changed |= self.presence.apply(e.user_id, e.state);
            }
            PushEvent::PresenceSnapshot(e) => {
                out.changed |= self.presence.replace(e.online);
            }
            PushEvent::ConversationTouched(e) => {
                out.effect(SyncEffect::FetchConversation(e.conversation_id));
            }
        }
    }

    fn on_message_created(
        &mut self,
        mut message: Message,
        token: Option<CorrelationToken>,
        out: &mut Applied,
    ) {
        let conversation_id = message.conversation_id;
        let message_id = message.id;

        // Reconcile the optimistic entry this message acknowledges
        let replaced = token.and_then(|t| self.store.take_pending(t));
        if let Some(ref pending) = replaced {
            out.changed = true;
            debug!(
                message_id = %message_id,
                token = %pending.token,
                "Optimistic send reconciled"
            );
        }
        if message.correlation.is_none() {
            message.correlation = token;
        }

        if let Some(updates) = self.pending.take(message_id) {
            if replay_onto(&mut message, updates) {
                out.effect(SyncEffect::Resync(conversation_id));
            }
        }

        let participant = message.counterpart(self.viewer);
        let snapshot = message.clone();
        let outcome = self.store.insert(message);
        match outcome {
            InsertOutcome::Hidden => {
                trace!(message_id = %message_id, "Ignoring message deleted for viewer");
            }
            InsertOutcome::Duplicate { changed, .. } => {
                trace!(message_id = %message_id, changed, "Duplicate message");
                out.changed |= changed;
            }
            InsertOutcome::Inserted => {
                out.changed = true;
                if self.index.ensure(conversation_id, participant) {
                    out.effect(SyncEffect::FetchConversation(conversation_id));
                }
            }
        }

        if !self.refresh_index(conversation_id) {
            if let Some(pending) = &replaced {
                self.index
                    .note_removed(conversation_id, pending.message.id, false, Some(&snapshot));
            }
            self.index.note_message(&snapshot);

            // A redelivered copy may carry a newer status or a deletion
            if let InsertOutcome::Duplicate {
                became_read,
                tombstoned,
                was_unread,
                ..
            } = outcome
            {
                if became_read {
                    self.index.note_read(conversation_id, 1);
                }
                if tombstoned {
                    self.after_removal(conversation_id, message_id, was_unread, out);
                }
            }
        }
    }

    fn on_status(&mut self, message_id: Snowflake, status: MessageStatus, out: &mut Applied) {
        match self.store.apply_status(message_id, status) {
            Some(change) if change.changed => {
                out.changed = true;
                if !self.refresh_index(change.conversation_id) && change.became_read {
                    self.index.note_read(change.conversation_id, 1);
                }
            }
            Some(_) => trace!(message_id = %message_id, ?status, "Status already applied"),
            None if self.store.is_hidden(message_id) => {}
            None => {
                debug!(message_id = %message_id, ?status, "Buffering status for unknown message");
                self.pending.push_status(message_id, status);
            }
        }
    }

    fn on_reaction(&mut self, event: ReactionChangedEvent, out: &mut Applied) {
        let ReactionChangedEvent {
            message_id,
            action,
            user_id,
            emoji,
        } = event;
        let viewer = self.viewer;

        let Some(conversation_id) = self.store.locate(message_id) else {
            if !self.store.is_hidden(message_id) {
                debug!(message_id = %message_id, "Buffering reaction for unknown message");
                self.pending.push_op(
                    message_id,
                    PendingOp::Reaction {
                        action,
                        user_id,
                        emoji,
                    },
                );
            }
            return;
        };
        let Some(message) = self.store.message_mut(message_id) else {
            return;
        };

        let changed = match action {
            ReactionAction::Add => match reactions::set_reaction(message, user_id, &emoji) {
                Ok(change) => change.is_change(),
                Err(err) => {
                    warn!(
                        message_id = %message_id,
                        user_id = %user_id,
                        emoji = %emoji,
                        error = %err,
                        "Rejected reaction from push, resyncing conversation"
                    );
                    out.effect(SyncEffect::Resync(conversation_id));
                    false
                }
            },
            ReactionAction::Remove => reactions::clear_reaction(message, user_id, &emoji),
        };

        if user_id == viewer {
            let current = message.reaction_of(viewer).map(|r| r.emoji.clone());
            if let Some(flight) = self.flights.get_mut(&message_id) {
                if current != flight.intended {
                    flight.superseded = true;
                }
            }
        }
        out.changed |= changed;
    }

    fn on_deleted(&mut self, message_ids: &[Snowflake], scope: DeleteScope, out: &mut Applied) {
        for &message_id in message_ids {
            self.flights.remove(&message_id);

            match scope {
                DeleteScope::ForEveryone => match self.store.tombstone(message_id) {
                    Some(result) if result.changed => {
                        out.changed = true;
                        self.after_removal(result.conversation_id, message_id, result.was_unread, out);
                    }
                    Some(_) => {}
                    None if self.store.is_hidden(message_id) => {}
                    None => {
                        debug!(message_id = %message_id, "Buffering deletion for unknown message");
                        self.pending
                            .push_op(message_id, PendingOp::Delete(DeleteScope::ForEveryone));
                    }
                },
                DeleteScope::ForMe => {
                    let conversation_id = self.store.locate(message_id);
                    self.pending.take(message_id);
                    if let (Some(message), Some(conversation_id)) =
                        (self.store.hide(message_id), conversation_id)
                    {
                        out.changed = true;
                        let was_unread =
                            !message.deleted_for_everyone && message.is_unread_for(self.viewer);
                        self.after_removal(conversation_id, message_id, was_unread, out);
                    }
                }
            }
        }
    }

    fn after_removal(
        &mut self,
        conversation_id: Snowflake,
        message_id: Snowflake,
        was_unread: bool,
        out: &mut Applied,
    ) {
        if self.refresh_index(conversation_id) {
            return;
        }
        let replacement = self
            .store
            .log(conversation_id)
            .and_then(|log| log.latest_visible());
        let update = self
            .index
            .note_removed(conversation_id, message_id, was_unread, replacement);
        if update.needs_fetch {
            out.effect(SyncEffect::FetchConversation(conversation_id));
        }
    }

    // ========================================================================
    // Local optimistic actions
    // ========================================================================

    fn on_local(&mut self, action: LocalAction, out: &mut Applied) -> SyncResult<()> {
        match action {
            LocalAction::BeginSend {
                conversation_id,
                receiver_id,
                payload,
                token,
            } => {
                payload.check()?;
                let local = self
                    .store
                    .begin_send(conversation_id, receiver_id, payload.clone(), token);
                out.changed = true;
                if self.index.ensure(conversation_id, receiver_id) {
                    out.effect(SyncEffect::FetchConversation(conversation_id));
                }
                if !self.refresh_index(conversation_id) {
                    self.index.note_message(&local);
                }
                debug!(conversation_id = %conversation_id, token = %token, "Optimistic send");
                out.effect(SyncEffect::SendMessage {
                    conversation_id,
                    payload,
                    token,
                });
            }
            LocalAction::ConfirmSend { token, message } => {
                self.on_message_created(message, Some(token), out);
            }
            LocalAction::FailSend { token } => {
                let Some(pending) = self.store.take_pending(token) else {
                    debug!(token = %token, "Failed send already reconciled");
                    return Ok(());
                };
                warn!(
                    conversation_id = %pending.message.conversation_id,
                    token = %token,
                    "Send failed, rolling back optimistic entry"
                );
                out.changed = true;
                self.after_removal(
                    pending.message.conversation_id,
                    pending.message.id,
                    false,
                    out,
                );
            }
            LocalAction::BeginReaction { message_id, emoji } => {
                if let Some(request) = self.begin_reaction(message_id, Some(emoji.clone()), out)? {
                    out.effect(SyncEffect::SendReaction {
                        message_id,
                        emoji,
                        request,
                    });
                }
            }
            LocalAction::BeginClearReaction { message_id, emoji } => {
                let has_it = self
                    .store
                    .message(message_id)
                    .ok_or(DomainError::MessageNotFound(message_id))?
                    .reaction_of(self.viewer)
                    .is_some_and(|r| r.is_emoji(&emoji));
                if has_it {
                    if let Some(request) = self.begin_reaction(message_id, None, out)? {
                        out.effect(SyncEffect::ClearReaction {
                            message_id,
                            emoji,
                            request,
                        });
                    }
                }
            }
            LocalAction::SettleReaction {
                message_id,
                request,
                ok,
            } => {
                self.settle_reaction(message_id, request, ok, out);
            }
            LocalAction::BeginMarkRead { conversation_id } => {
                let marked = self.store.mark_read_local(conversation_id);
                if marked.is_empty() {
                    return Ok(());
                }
                out.changed = true;
                if !self.refresh_index(conversation_id) {
                    self.index
                        .note_read(conversation_id, marked.len() as u32);
                }
                for message_id in marked {
                    out.effect(SyncEffect::SendStatus {
                        message_id,
                        status: MessageStatus::Read,
                    });
                }
            }
            LocalAction::SettleMarkRead { message_id, ok } => {
                if let Some((conversation_id, unread_again)) = self.store.settle_read(message_id, ok)
                {
                    if unread_again {
                        out.changed = true;
                        if !self.refresh_index(conversation_id) {
                            self.index.note_unread(conversation_id, 1);
                        }
                    }
                }
            }
            LocalAction::ConfirmDelete { message_ids, scope } => {
                self.on_deleted(&message_ids, scope, out);
            }
        }
        Ok(())
    }

    /// Optimistically set (`Some`) or clear (`None`) the viewer's reaction
    ///
    /// Returns the request id the backend call must settle, or `None` if nothing changed.
    fn begin_reaction(
        &mut self,
        message_id: Snowflake,
        emoji: Option<String>,
        out: &mut Applied,
    ) -> SyncResult<Option<u64>> {
        let viewer = self.viewer;
        let message = self
            .store
            .message_mut(message_id)
            .ok_or(DomainError::MessageNotFound(message_id))?;
        let prior = message.reaction_of(viewer).map(|r| r.emoji.clone());

        let changed = match &emoji {
            Some(emoji) => reactions::set_reaction(message, viewer, emoji)?.is_change(),
            None => prior
                .as_deref()
                .is_some_and(|p| reactions::clear_reaction(message, viewer, p)),
        };
        if !changed {
            return Ok(None);
        }

        self.next_request += 1;
        let request = self.next_request;
        let flight = self.flights.entry(message_id).or_insert(ReactionFlight {
            prior,
            intended: None,
            requests: Vec::new(),
            latest: 0,
            acknowledged: 0,
            superseded: false,
        });
        flight.intended.clone_from(&emoji);
        flight.requests.push((request, emoji));
        flight.latest = request;
        out.changed = true;
        Ok(Some(request))
    }

    fn settle_reaction(&mut self, message_id: Snowflake, request: u64, ok: bool, out: &mut Applied) {
        let viewer = self.viewer;
        let Some(flight) = self.flights.get_mut(&message_id) else {
            return;
        };
        let Some(at) = flight.requests.iter().position(|(id, _)| *id == request) else {
            return;
        };
        let (_, value) = flight.requests.remove(at);

        if ok {
            if request > flight.acknowledged {
                flight.acknowledged = request;
                flight.prior = value;
            }
        } else {
            // A newer request owns the local value; only the resync may correct it
            if request == flight.latest && !flight.superseded {
                if let Some(message) = self.store.message_mut(message_id) {
                    let current = message.reaction_of(viewer).map(|r| r.emoji.clone());
                    if current == value {
                        out.changed |=
                            reactions::restore_reaction(message, viewer, flight.prior.as_deref());
                    }
                }
            }
            if let Some(conversation_id) = self.store.locate(message_id) {
                warn!(message_id = %message_id, request, "Reaction change failed, resyncing conversation");
                out.effect(SyncEffect::Resync(conversation_id));
            }
        }

        if flight.requests.is_empty() {
            self.flights.remove(&message_id);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Re-derive the summary of a snapshot-backed conversation
    ///
    /// Returns false if the conversation has no complete log, in which case the caller
    /// applies the incremental rule instead.
    fn refresh_index(&mut self, conversation_id: Snowflake) -> bool {
        match self.store.log(conversation_id) {
            Some(log) if log.is_complete() => {
                self.index.derive(log);
                true
            }
            _ => false,
        }
    }
}

/// Apply buffered updates to a message before it is inserted
///
/// Returns true if a buffered reaction was rejected and the conversation needs a resync.
fn replay_onto(message: &mut Message, updates: PendingUpdates) -> bool {
    if let Some(status) = updates.status {
        message.apply_status(status);
    }
    replay_ops(message, updates.ops)
}

fn replay_ops(message: &mut Message, ops: Vec<PendingOp>) -> bool {
    let mut rejected = false;
    for op in ops {
        match op {
            PendingOp::Reaction {
                action: ReactionAction::Add,
                user_id,
                emoji,
            } => {
                if let Err(err) = reactions::set_reaction(message, user_id, &emoji) {
                    warn!(message_id = %message.id, error = %err, "Dropping buffered reaction");
                    rejected = true;
                }
            }
            PendingOp::Reaction {
                action: ReactionAction::Remove,
                user_id,
                emoji,
            } => {
                reactions::clear_reaction(message, user_id, &emoji);
            }
            PendingOp::Delete(DeleteScope::ForEveryone) => {
                message.tombstone();
            }
            // Hidden ids are tracked by the store
            PendingOp::Delete(DeleteScope::ForMe) => {}
        }
    }
    rejected
}
