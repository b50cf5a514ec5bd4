//! Backend port - the request/response contract of the authoritative ledger
//!
//! The synchronization layer defines what it needs; transports (HTTP, in-memory fakes)
//! provide the implementation. All calls act on behalf of the authenticated viewer.

use async_trait::async_trait;

use crate::entities::{ConversationSummary, DeleteScope, Message, MessagePayload, MessageStatus};
use crate::error::DomainError;
use crate::value_objects::{CorrelationToken, Snowflake};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, DomainError>;

#[async_trait]
pub trait SyncBackend: Send + Sync {
    // ========================================================================
    // Reads (idempotent)
    // ========================================================================

    /// Authoritative ordered message list of one conversation
    async fn fetch_messages(&self, conversation_id: Snowflake) -> BackendResult<Vec<Message>>;

    /// All conversation summaries of the viewer
    async fn fetch_conversations(&self) -> BackendResult<Vec<ConversationSummary>>;

    /// Summary of a single conversation
    async fn fetch_conversation(
        &self,
        conversation_id: Snowflake,
    ) -> BackendResult<ConversationSummary>;

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a message; the token is echoed on the returned message and its push event
    async fn send_message(
        &self,
        conversation_id: Snowflake,
        payload: &MessagePayload,
        correlation: CorrelationToken,
    ) -> BackendResult<Message>;

    async fn set_status(&self, message_id: Snowflake, status: MessageStatus) -> BackendResult<()>;

    /// Set the viewer's reaction, replacing any previous one in the same call
    async fn set_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()>;

    async fn clear_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()>;

    async fn delete_message(&self, message_id: Snowflake, scope: DeleteScope)
        -> BackendResult<()>;
}
