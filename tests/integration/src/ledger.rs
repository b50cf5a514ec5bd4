//! In-memory authoritative ledger
//!
//! Plays the role of the backend for any number of viewers. Every accepted mutation queues
//! the push events the real backend would publish, per recipient, so tests decide when and
//! in which order each session sees them.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{
    BackendResult, ConversationSummary, CorrelationToken, DeleteScope, DomainError, LastMessage,
    Message, MessageCreatedEvent, MessageDeletedEvent, MessagePayload, MessageStatus,
    MessageStatusChangedEvent, PushEvent, ReactionAction, ReactionChangedEvent, Snowflake,
    SnowflakeGenerator, SyncBackend,
};
use parking_lot::Mutex;

const PREVIEW_CHARS: usize = 80;

/// Backend operations that can be failed on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FetchMessages,
    FetchConversations,
    FetchConversation,
    SendMessage,
    SetStatus,
    SetReaction,
    ClearReaction,
    DeleteMessage,
}

#[derive(Debug, Clone, Copy)]
struct Participants {
    a: Snowflake,
    b: Snowflake,
}

impl Participants {
    fn includes(self, user: Snowflake) -> bool {
        self.a == user || self.b == user
    }

    fn other(self, user: Snowflake) -> Snowflake {
        if self.a == user {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Debug, Default)]
struct State {
    conversations: BTreeMap<Snowflake, Participants>,
    /// Ascending by id
    messages: BTreeMap<Snowflake, Message>,
    hidden: HashSet<(Snowflake, Snowflake)>,
    outbox: HashMap<Snowflake, Vec<PushEvent>>,
    failures: HashMap<Op, VecDeque<DomainError>>,
    calls: HashMap<Op, usize>,
}

impl State {
    fn enter(&mut self, op: Op) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn publish(&mut self, recipients: &[Snowflake], event: &PushEvent) {
        for user in recipients {
            self.outbox.entry(*user).or_default().push(event.clone());
        }
    }

    fn conversation(&self, viewer: Snowflake, id: Snowflake) -> BackendResult<Participants> {
        self.conversations
            .get(&id)
            .copied()
            .filter(|p| p.includes(viewer))
            .ok_or(DomainError::ConversationNotFound(id))
    }

    /// Message visible to `viewer` and the conversation participants
    fn message_mut(
        &mut self,
        viewer: Snowflake,
        id: Snowflake,
    ) -> BackendResult<(&mut Message, Participants)> {
        if self.hidden.contains(&(viewer, id)) {
            return Err(DomainError::MessageNotFound(id));
        }
        let message = self
            .messages
            .get_mut(&id)
            .ok_or(DomainError::MessageNotFound(id))?;
        let participants = self
            .conversations
            .get(&message.conversation_id)
            .copied()
            .filter(|p| p.includes(viewer))
            .ok_or(DomainError::MessageNotFound(id))?;
        Ok((message, participants))
    }

    fn visible(&self, viewer: Snowflake, conversation_id: Snowflake) -> Vec<Message> {
        self.messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| !self.hidden.contains(&(viewer, m.id)))
            .map(|m| {
                let mut m = m.clone();
                // The token only ever reaches its sender
                if m.sender_id != viewer {
                    m.correlation = None;
                }
                m
            })
            .collect()
    }

    fn summary(&self, viewer: Snowflake, id: Snowflake, participants: Participants) -> ConversationSummary {
        let messages = self.visible(viewer, id);
        let unread = messages
            .iter()
            .filter(|m| !m.deleted_for_everyone && m.is_unread_for(viewer))
            .count();
        let last = messages.last();
        ConversationSummary {
            id,
            participant_id: participants.other(viewer),
            last_message: last.map(|m| LastMessage::from_message(m, PREVIEW_CHARS)),
            unread_count: unread as u32,
            last_activity: last.map_or_else(|| id.created_at(), |m| m.created_at),
        }
    }
}

/// Shared authoritative state; cheap to clone
#[derive(Clone)]
pub struct Ledger {
    state: Arc<Mutex<State>>,
    ids: Arc<SnowflakeGenerator>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            ids: Arc::new(SnowflakeGenerator::new(1)),
        }
    }

    /// Create a conversation between two users
    pub fn open_conversation(&self, a: Snowflake, b: Snowflake) -> Snowflake {
        let id = self.ids.generate();
        self.state.lock().conversations.insert(id, Participants { a, b });
        id
    }

    /// The backend as seen by `viewer`
    pub fn backend(&self, viewer: Snowflake) -> Arc<LedgerBackend> {
        Arc::new(LedgerBackend {
            ledger: self.clone(),
            viewer,
        })
    }

    /// Fail the next call of `op` with `err`
    pub fn fail_next(&self, op: Op, err: DomainError) {
        self.state.lock().failures.entry(op).or_default().push_back(err);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Take the push events queued for `user`, oldest first
    pub fn drain(&self, user: Snowflake) -> Vec<PushEvent> {
        self.state.lock().outbox.remove(&user).unwrap_or_default()
    }

    /// Authoritative messages of a conversation as `viewer` would fetch them
    pub fn messages(&self, viewer: Snowflake, conversation_id: Snowflake) -> Vec<Message> {
        self.state.lock().visible(viewer, conversation_id)
    }

    /// Record the delivery receipt of the recipient's device
    pub fn mark_delivered(&self, message_id: Snowflake) -> bool {
        let mut state = self.state.lock();
        let Some(message) = state.messages.get_mut(&message_id) else {
            return false;
        };
        if !message.apply_status(MessageStatus::Delivered) {
            return false;
        }
        let recipients = [message.sender_id, message.receiver_id];
        let event = PushEvent::MessageStatusChanged(MessageStatusChangedEvent {
            message_id,
            status: MessageStatus::Delivered,
        });
        state.publish(&recipients, &event);
        true
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// [`SyncBackend`] acting as one viewer against a [`Ledger`]
pub struct LedgerBackend {
    ledger: Ledger,
    viewer: Snowflake,
}

impl LedgerBackend {
    pub fn viewer(&self) -> Snowflake {
        self.viewer
    }
}

#[async_trait]
impl SyncBackend for LedgerBackend {
    async fn fetch_messages(&self, conversation_id: Snowflake) -> BackendResult<Vec<Message>> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::FetchMessages)?;
        state.conversation(self.viewer, conversation_id)?;
        Ok(state.visible(self.viewer, conversation_id))
    }

    async fn fetch_conversations(&self) -> BackendResult<Vec<ConversationSummary>> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::FetchConversations)?;
        let mut summaries: Vec<_> = state
            .conversations
            .iter()
            .filter(|(_, p)| p.includes(self.viewer))
            .map(|(id, p)| state.summary(self.viewer, *id, *p))
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(summaries)
    }

    async fn fetch_conversation(&self, conversation_id: Snowflake) -> BackendResult<ConversationSummary> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::FetchConversation)?;
        let participants = state.conversation(self.viewer, conversation_id)?;
        Ok(state.summary(self.viewer, conversation_id, participants))
    }

    async fn send_message(
        &self,
        conversation_id: Snowflake,
        payload: &MessagePayload,
        correlation: CorrelationToken,
    ) -> BackendResult<Message> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::SendMessage)?;
        let participants = state.conversation(self.viewer, conversation_id)?;
        payload.check()?;

        let receiver = participants.other(self.viewer);
        let message = Message::new(
            self.ledger.ids.generate(),
            conversation_id,
            self.viewer,
            receiver,
            payload.clone(),
        )
        .with_correlation(correlation);
        state.messages.insert(message.id, message.clone());

        state.publish(
            &[self.viewer],
            &PushEvent::MessageCreated(MessageCreatedEvent::new(message.clone())),
        );
        let mut inbound = message.clone();
        inbound.correlation = None;
        state.publish(
            &[receiver],
            &PushEvent::MessageCreated(MessageCreatedEvent::new(inbound)),
        );
        Ok(message)
    }

    async fn set_status(&self, message_id: Snowflake, status: MessageStatus) -> BackendResult<()> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::SetStatus)?;
        let viewer = self.viewer;
        let (message, _) = state.message_mut(viewer, message_id)?;
        if message.receiver_id != viewer {
            return Err(DomainError::Validation(
                "Only the receiver can advance the status".to_string(),
            ));
        }
        if !message.apply_status(status) {
            return Ok(());
        }
        let recipients = [message.sender_id, message.receiver_id];
        let event = PushEvent::MessageStatusChanged(MessageStatusChangedEvent {
            message_id,
            status: message.status,
        });
        state.publish(&recipients, &event);
        Ok(())
    }

    async fn set_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::SetReaction)?;
        let viewer = self.viewer;
        let (message, participants) = state.message_mut(viewer, message_id)?;
        let previous = message.reaction_of(viewer).map(|r| r.emoji.clone());
        if !chat_sync::reactions::set_reaction(message, viewer, emoji)?.is_change() {
            return Ok(());
        }

        let recipients = [participants.a, participants.b];
        if let Some(previous) = previous {
            state.publish(
                &recipients,
                &PushEvent::ReactionChanged(ReactionChangedEvent {
                    message_id,
                    action: ReactionAction::Remove,
                    user_id: viewer,
                    emoji: previous,
                }),
            );
        }
        state.publish(
            &recipients,
            &PushEvent::ReactionChanged(ReactionChangedEvent {
                message_id,
                action: ReactionAction::Add,
                user_id: viewer,
                emoji: emoji.to_string(),
            }),
        );
        Ok(())
    }

    async fn clear_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::ClearReaction)?;
        let viewer = self.viewer;
        let (message, participants) = state.message_mut(viewer, message_id)?;
        if !chat_sync::reactions::clear_reaction(message, viewer, emoji) {
            return Ok(());
        }
        state.publish(
            &[participants.a, participants.b],
            &PushEvent::ReactionChanged(ReactionChangedEvent {
                message_id,
                action: ReactionAction::Remove,
                user_id: viewer,
                emoji: emoji.to_string(),
            }),
        );
        Ok(())
    }

    async fn delete_message(&self, message_id: Snowflake, scope: DeleteScope) -> BackendResult<()> {
        let mut state = self.ledger.state.lock();
        state.enter(Op::DeleteMessage)?;
        let viewer = self.viewer;
        let (message, participants) = state.message_mut(viewer, message_id)?;

        let recipients = match scope {
            DeleteScope::ForEveryone => {
                if message.sender_id != viewer {
                    return Err(DomainError::Validation(
                        "Only the sender can delete for everyone".to_string(),
                    ));
                }
                message.tombstone();
                vec![participants.a, participants.b]
            }
            DeleteScope::ForMe => {
                state.hidden.insert((viewer, message_id));
                vec![viewer]
            }
        };
        state.publish(
            &recipients,
            &PushEvent::MessageDeleted(MessageDeletedEvent {
                message_ids: vec![message_id],
                scope,
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Snowflake = Snowflake::new(1);
    const BOB: Snowflake = Snowflake::new(2);

    #[tokio::test]
    async fn test_send_routes_events_to_both_participants() {
        let ledger = Ledger::new();
        let conversation = ledger.open_conversation(ALICE, BOB);
        let token = CorrelationToken::new();

        let message = ledger
            .backend(ALICE)
            .send_message(conversation, &MessagePayload::text("hi"), token)
            .await
            .unwrap();
        assert_eq!(message.receiver_id, BOB);

        let PushEvent::MessageCreated(own) = &ledger.drain(ALICE)[0] else {
            panic!("expected MessageCreated");
        };
        assert_eq!(own.correlation, Some(token));
        let PushEvent::MessageCreated(inbound) = &ledger.drain(BOB)[0] else {
            panic!("expected MessageCreated");
        };
        assert_eq!(inbound.correlation, None);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let ledger = Ledger::new();
        let conversation = ledger.open_conversation(ALICE, BOB);
        ledger.fail_next(Op::FetchMessages, DomainError::Transport("down".into()));

        let backend = ledger.backend(ALICE);
        assert!(backend.fetch_messages(conversation).await.unwrap_err().is_transient());
        assert!(backend.fetch_messages(conversation).await.unwrap().is_empty());
        assert_eq!(ledger.calls(Op::FetchMessages), 2);
    }

    #[tokio::test]
    async fn test_outsider_cannot_read() {
        let ledger = Ledger::new();
        let conversation = ledger.open_conversation(ALICE, BOB);
        let err = ledger
            .backend(Snowflake::new(3))
            .fetch_messages(conversation)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
