//! Synchronization errors

use chat_core::{CorrelationToken, DomainError, Snowflake};
use thiserror::Error;

/// Errors surfaced by the reducer and the session
#[derive(Debug, Error)]
pub enum SyncError {
    /// Rejected before anything was applied
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The optimistic entry for `token` was rolled back
    #[error("Send {token} failed: {source}")]
    SendFailed {
        token: CorrelationToken,
        #[source]
        source: DomainError,
    },

    /// The viewer's reaction on the message was restored and the conversation resynced
    #[error("Reaction on message {message_id} rolled back: {source}")]
    ReactionRolledBack {
        message_id: Snowflake,
        #[source]
        source: DomainError,
    },

    /// The local read marker on the message was dropped
    #[error("Marking message {message_id} as read failed: {source}")]
    MarkReadFailed {
        message_id: Snowflake,
        #[source]
        source: DomainError,
    },

    #[error("Push channel error: {0}")]
    Push(String),
}

impl SyncError {
    /// Underlying domain error, if any
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e)
            | Self::SendFailed { source: e, .. }
            | Self::ReactionRolledBack { source: e, .. }
            | Self::MarkReadFailed { source: e, .. } => Some(e),
            Self::Push(_) => None,
        }
    }

    /// Whether the error is a rejected invariant such as the reaction type cap
    pub fn is_invariant(&self) -> bool {
        self.domain().is_some_and(DomainError::is_invariant)
    }

    /// Whether an optimistic entry was compensated
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            Self::SendFailed { .. } | Self::ReactionRolledBack { .. } | Self::MarkReadFailed { .. }
        )
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
