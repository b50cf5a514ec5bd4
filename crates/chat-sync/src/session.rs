//! Sync session - the serialization point of one viewer's client state
//!
//! All inputs go through one mutex-guarded [`SyncReducer`]; the lock is never held across
//! an await. The session executes the effects the reducer returns against a
//! [`SyncBackend`] and feeds the results back as inputs.

use std::collections::VecDeque;
use std::sync::Arc;

use chat_common::SyncConfig;
use chat_core::{
    ConversationSummary, CorrelationToken, DeleteScope, Message, MessagePayload, PushEvent,
    ReactionGroup, Snowflake, SyncBackend,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::reducer::{Applied, LocalAction, SyncEffect, SyncInput, SyncReducer};
use crate::retry::RetryPolicy;

struct Inner {
    reducer: Mutex<SyncReducer>,
    backend: Arc<dyn SyncBackend>,
    retry: RetryPolicy,
    revision: watch::Sender<u64>,
}

/// Cheaply cloneable handle to one viewer's synchronized state
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<Inner>,
}

impl SyncSession {
    pub fn new(viewer: Snowflake, backend: Arc<dyn SyncBackend>, config: &SyncConfig) -> Self {
        Self::with_parts(
            SyncReducer::new(viewer, config.pending_buffer, config.preview_chars),
            backend,
            config.retry.into(),
        )
    }

    pub fn with_parts(reducer: SyncReducer, backend: Arc<dyn SyncBackend>, retry: RetryPolicy) -> Self {
        let (revision, _) = watch::channel(reducer.revision());
        Self {
            inner: Arc::new(Inner {
                reducer: Mutex::new(reducer),
                backend,
                retry,
                revision,
            }),
        }
    }

    pub fn viewer(&self) -> Snowflake {
        self.inner.reducer.lock().viewer()
    }

    /// Apply one input under the lock and publish the new revision
    pub fn apply(&self, input: SyncInput) -> SyncResult<Applied> {
        let (applied, revision) = {
            let mut reducer = self.inner.reducer.lock();
            let applied = reducer.apply(input)?;
            (applied, reducer.revision())
        };
        if applied.changed {
            self.inner.revision.send_replace(revision);
        }
        Ok(applied)
    }

    /// Receives the reducer revision after every state change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Load (or reload) a conversation from the backend
    #[instrument(skip(self))]
    pub async fn open_conversation(&self, conversation_id: Snowflake) -> SyncResult<Vec<Message>> {
        let effects = self.snapshot(conversation_id).await?;
        self.run_effects(effects).await?;
        Ok(self.messages(conversation_id))
    }

    #[instrument(skip(self))]
    pub async fn refresh_conversations(&self) -> SyncResult<Vec<ConversationSummary>> {
        let backend = &self.inner.backend;
        let summaries = self
            .inner
            .retry
            .run("fetch_conversations", || backend.fetch_conversations())
            .await?;
        self.apply(SyncInput::ConversationList(summaries))?;
        Ok(self.conversations())
    }

    /// Reload the conversation list and every loaded conversation
    ///
    /// Heals whatever the push channel dropped while disconnected.
    #[instrument(skip(self))]
    pub async fn resync_all(&self) -> SyncResult<()> {
        let mut first_error = self.refresh_conversations().await.err();

        let loaded = self.inner.reducer.lock().loaded_conversations();
        info!(conversations = loaded.len(), "Resyncing loaded conversations");
        for conversation_id in loaded {
            let result = match self.snapshot(conversation_id).await {
                Ok(effects) => self.run_effects(effects).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                warn!(conversation_id = %conversation_id, error = %err, "Resync failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn snapshot(&self, conversation_id: Snowflake) -> SyncResult<Vec<SyncEffect>> {
        let generation = self
            .apply(SyncInput::BeginSnapshot { conversation_id })?
            .generation
            .unwrap_or_default();

        let backend = &self.inner.backend;
        let messages = self
            .inner
            .retry
            .run("fetch_messages", || backend.fetch_messages(conversation_id))
            .await?;

        let applied = self.apply(SyncInput::Snapshot {
            conversation_id,
            generation,
            messages,
        })?;
        Ok(applied.effects)
    }

    // ========================================================================
    // Local actions
    // ========================================================================

    /// Send a message optimistically; returns the confirmed message
    #[instrument(skip(self, payload))]
    pub async fn send_message(
        &self,
        conversation_id: Snowflake,
        receiver_id: Snowflake,
        payload: MessagePayload,
    ) -> SyncResult<Message> {
        let token = CorrelationToken::new();
        let applied = self.apply(SyncInput::Local(LocalAction::BeginSend {
            conversation_id,
            receiver_id,
            payload: payload.clone(),
            token,
        }))?;
        let rest: Vec<SyncEffect> = applied
            .effects
            .into_iter()
            .filter(|e| !matches!(e, SyncEffect::SendMessage { .. }))
            .collect();

        let (message, effects) = self.deliver(conversation_id, &payload, token).await?;
        self.run_effects(rest.into_iter().chain(effects).collect())
            .await?;
        Ok(message)
    }

    /// Set the viewer's reaction, replacing any previous one
    #[instrument(skip(self))]
    pub async fn set_reaction(&self, message_id: Snowflake, emoji: &str) -> SyncResult<()> {
        let applied = self.apply(SyncInput::Local(LocalAction::BeginReaction {
            message_id,
            emoji: emoji.to_string(),
        }))?;
        self.run_effects(applied.effects).await
    }

    #[instrument(skip(self))]
    pub async fn clear_reaction(&self, message_id: Snowflake, emoji: &str) -> SyncResult<()> {
        let applied = self.apply(SyncInput::Local(LocalAction::BeginClearReaction {
            message_id,
            emoji: emoji.to_string(),
        }))?;
        self.run_effects(applied.effects).await
    }

    /// Mark every unread inbound message of the conversation as read
    #[instrument(skip(self))]
    pub async fn mark_read(&self, conversation_id: Snowflake) -> SyncResult<()> {
        let applied = self.apply(SyncInput::Local(LocalAction::BeginMarkRead { conversation_id }))?;
        self.run_effects(applied.effects).await
    }

    /// Delete a message; applied once the backend acknowledges it
    #[instrument(skip(self))]
    pub async fn delete_message(&self, message_id: Snowflake, scope: DeleteScope) -> SyncResult<()> {
        self.inner.backend.delete_message(message_id, scope).await?;
        let applied = self.apply(SyncInput::Local(LocalAction::ConfirmDelete {
            message_ids: vec![message_id],
            scope,
        }))?;
        self.run_effects(applied.effects).await
    }

    // ========================================================================
    // Push events
    // ========================================================================

    /// Apply a push event and return the follow-up work without running it
    pub fn apply_push(&self, event: PushEvent) -> Vec<SyncEffect> {
        match self.apply(SyncInput::Push(event)) {
            Ok(applied) => applied.effects,
            Err(err) => {
                warn!(error = %err, "Push event rejected");
                Vec::new()
            }
        }
    }

    /// Apply a push event and run its follow-up work to completion
    pub async fn handle_push(&self, event: PushEvent) -> SyncResult<()> {
        let effects = self.apply_push(event);
        self.run_effects(effects).await
    }

    // ========================================================================
    // Effects
    // ========================================================================

    /// Execute effects until none remain; returns the first failure
    pub async fn run_effects(&self, effects: Vec<SyncEffect>) -> SyncResult<()> {
        let mut queue: VecDeque<SyncEffect> = effects.into();
        let mut first_error: Option<SyncError> = None;

        while let Some(effect) = queue.pop_front() {
            match self.execute(effect).await {
                Ok(next) => queue.extend(next),
                Err((next, err)) => {
                    queue.extend(next);
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn execute(
        &self,
        effect: SyncEffect,
    ) -> Result<Vec<SyncEffect>, (Vec<SyncEffect>, SyncError)> {
        let backend = &self.inner.backend;

        match effect {
            SyncEffect::FetchConversation(conversation_id) => {
                let result = self
                    .inner
                    .retry
                    .run("fetch_conversation", || backend.fetch_conversation(conversation_id))
                    .await;
                match result {
                    Ok(summary) => self
                        .apply(SyncInput::ConversationFetched(summary))
                        .map(|a| a.effects)
                        .map_err(|e| (Vec::new(), e)),
                    Err(err) if err.is_not_found() => {
                        debug!(conversation_id = %conversation_id, "Conversation vanished before fetch");
                        Ok(Vec::new())
                    }
                    Err(err) => {
                        warn!(conversation_id = %conversation_id, error = %err, "Summary fetch failed");
                        Err((Vec::new(), err.into()))
                    }
                }
            }
            SyncEffect::Resync(conversation_id) => self
                .snapshot(conversation_id)
                .await
                .map_err(|e| (Vec::new(), e)),
            SyncEffect::SendMessage {
                conversation_id,
                payload,
                token,
            } => self
                .deliver(conversation_id, &payload, token)
                .await
                .map(|(_, effects)| effects)
                .map_err(|e| (Vec::new(), e)),
            SyncEffect::SendStatus { message_id, status } => {
                let result = backend.set_status(message_id, status).await;
                let settled = self.apply(SyncInput::Local(LocalAction::SettleMarkRead {
                    message_id,
                    ok: result.is_ok(),
                }));
                let next = settled.map(|a| a.effects).unwrap_or_default();
                match result {
                    Ok(()) => Ok(next),
                    Err(source) => {
                        warn!(message_id = %message_id, error = %source, "Mark as read failed");
                        Err((next, SyncError::MarkReadFailed { message_id, source }))
                    }
                }
            }
            SyncEffect::SendReaction {
                message_id,
                emoji,
                request,
            } => {
                let result = backend.set_reaction(message_id, &emoji).await;
                self.settle_reaction(message_id, request, result)
            }
            SyncEffect::ClearReaction {
                message_id,
                emoji,
                request,
            } => {
                let result = backend.clear_reaction(message_id, &emoji).await;
                self.settle_reaction(message_id, request, result)
            }
        }
    }

    /// Outbound send; never retried
    async fn deliver(
        &self,
        conversation_id: Snowflake,
        payload: &MessagePayload,
        token: CorrelationToken,
    ) -> SyncResult<(Message, Vec<SyncEffect>)> {
        match self
            .inner
            .backend
            .send_message(conversation_id, payload, token)
            .await
        {
            Ok(message) => {
                let applied = self.apply(SyncInput::Local(LocalAction::ConfirmSend {
                    token,
                    message: message.clone(),
                }))?;
                Ok((message, applied.effects))
            }
            Err(source) => {
                self.apply(SyncInput::Local(LocalAction::FailSend { token }))?;
                Err(SyncError::SendFailed { token, source })
            }
        }
    }

    fn settle_reaction(
        &self,
        message_id: Snowflake,
        request: u64,
        result: Result<(), chat_core::DomainError>,
    ) -> Result<Vec<SyncEffect>, (Vec<SyncEffect>, SyncError)> {
        let settled = self.apply(SyncInput::Local(LocalAction::SettleReaction {
            message_id,
            request,
            ok: result.is_ok(),
        }));
        let next = settled.map(|a| a.effects).unwrap_or_default();
        match result {
            Ok(()) => Ok(next),
            Err(source) => Err((next, SyncError::ReactionRolledBack { message_id, source })),
        }
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn messages(&self, conversation_id: Snowflake) -> Vec<Message> {
        self.inner.reducer.lock().messages(conversation_id)
    }

    pub fn message(&self, message_id: Snowflake) -> Option<Message> {
        self.inner.reducer.lock().message(message_id).cloned()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.reducer.lock().conversations()
    }

    pub fn reaction_groups(&self, message_id: Snowflake) -> Vec<ReactionGroup> {
        self.inner.reducer.lock().reaction_groups(message_id)
    }

    /// Online user ids, for call signalling and presence badges
    pub fn online_users(&self) -> Vec<Snowflake> {
        self.inner.reducer.lock().online_users()
    }

    pub fn is_online(&self, user_id: Snowflake) -> bool {
        self.inner.reducer.lock().is_online(user_id)
    }

    pub fn revision(&self) -> u64 {
        self.inner.reducer.lock().revision()
    }

    pub fn evicted(&self) -> u64 {
        self.inner.reducer.lock().evicted()
    }
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("viewer", &self.viewer())
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
