//! Domain errors - error types for the domain layer

use thiserror::Error;

use crate::value_objects::{CorrelationToken, Snowflake};

/// Domain layer errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    // =========================================================================
    // Not Found Errors
    // =========================================================================
    #[error("Message not found: {0}")]
    MessageNotFound(Snowflake),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Snowflake),

    #[error("No pending action for correlation token {0}")]
    UnknownCorrelation(CorrelationToken),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Invariant Violations
    // =========================================================================
    #[error("Message {message_id} already carries the maximum number of distinct reactions")]
    ReactionTypeLimitExceeded { message_id: Snowflake },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// The request never reached the backend or the backend failed transiently
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend refused the request with an error code this layer does not model
    #[error("Rejected by backend ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Get an error code string for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::MessageNotFound(_) => "UNKNOWN_MESSAGE",
            Self::ConversationNotFound(_) => "UNKNOWN_CONVERSATION",
            Self::UnknownCorrelation(_) => "UNKNOWN_CORRELATION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ReactionTypeLimitExceeded { .. } => "REACTION_TYPE_LIMIT_EXCEEDED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Rejected { .. } => "REJECTED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Map a backend error code back to a domain error
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "REACTION_TYPE_LIMIT_EXCEEDED" => Self::ReactionTypeLimitExceeded {
                message_id: Snowflake::default(),
            },
            "VALIDATION_ERROR" => Self::Validation(message),
            "TRANSPORT_ERROR" => Self::Transport(message),
            "INTERNAL_ERROR" => Self::Internal(message),
            _ => Self::Rejected {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MessageNotFound(_) | Self::ConversationNotFound(_) | Self::UnknownCorrelation(_)
        )
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a rejected invariant
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::ReactionTypeLimitExceeded { .. })
    }

    /// Check if retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
