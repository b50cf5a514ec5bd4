//! REST implementation of the backend port

use std::time::Duration;

use async_trait::async_trait;
use chat_common::ErrorResponse;
use chat_core::{
    BackendResult, ConversationSummary, CorrelationToken, DeleteScope, DomainError, Message,
    MessagePayload, MessageStatus, Snowflake, SyncBackend,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    payload: &'a MessagePayload,
    correlation: CorrelationToken,
}

#[derive(Debug, Serialize)]
struct SetStatusRequest {
    status: MessageStatus,
}

#[derive(Debug, Serialize)]
struct ReactionRequest<'a> {
    emoji: &'a str,
}

/// What a 404 means for the request being made
#[derive(Debug, Clone, Copy)]
enum Subject {
    Conversation(Snowflake),
    Message(Snowflake),
    None,
}

/// `SyncBackend` over HTTP + JSON, authenticated with a bearer token
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, subject: Subject) -> BackendResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Backend request failed");
                DomainError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(error_from_response(status, response, subject).await)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, subject: Subject) -> BackendResult<T> {
        let response = self.send(self.client.get(self.url(path)), subject).await?;
        decode(response).await
    }
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| DomainError::Internal(format!("Malformed backend response: {e}")))
}

async fn error_from_response(status: StatusCode, response: Response, subject: Subject) -> DomainError {
    let body = response.json::<ErrorResponse>().await.ok();
    debug!(status = status.as_u16(), code = ?body.as_ref().map(|b| &b.code), "Backend error response");

    if status.is_server_error() {
        let message = body.map_or_else(|| status.to_string(), |b| b.message);
        return DomainError::Transport(message);
    }

    if status == StatusCode::NOT_FOUND {
        match subject {
            Subject::Conversation(id) => return DomainError::ConversationNotFound(id),
            Subject::Message(id) => return DomainError::MessageNotFound(id),
            Subject::None => {}
        }
    }

    match body.map(ErrorResponse::into_domain) {
        Some(DomainError::ReactionTypeLimitExceeded { .. }) => {
            let message_id = match subject {
                Subject::Message(id) => id,
                _ => Snowflake::default(),
            };
            DomainError::ReactionTypeLimitExceeded { message_id }
        }
        Some(err) => err,
        None => DomainError::Rejected {
            code: status.as_u16().to_string(),
            message: status.canonical_reason().unwrap_or("error").to_string(),
        },
    }
}

#[async_trait]
impl SyncBackend for RestBackend {
    async fn fetch_messages(&self, conversation_id: Snowflake) -> BackendResult<Vec<Message>> {
        self.get_json(
            &format!("/conversations/{conversation_id}/messages"),
            Subject::Conversation(conversation_id),
        )
        .await
    }

    async fn fetch_conversations(&self) -> BackendResult<Vec<ConversationSummary>> {
        self.get_json("/conversations", Subject::None).await
    }

    async fn fetch_conversation(&self, conversation_id: Snowflake) -> BackendResult<ConversationSummary> {
        self.get_json(
            &format!("/conversations/{conversation_id}"),
            Subject::Conversation(conversation_id),
        )
        .await
    }

    async fn send_message(
        &self,
        conversation_id: Snowflake,
        payload: &MessagePayload,
        correlation: CorrelationToken,
    ) -> BackendResult<Message> {
        let request = self
            .client
            .post(self.url(&format!("/conversations/{conversation_id}/messages")))
            .json(&SendMessageRequest {
                payload,
                correlation,
            });
        let response = self
            .send(request, Subject::Conversation(conversation_id))
            .await?;
        decode(response).await
    }

    async fn set_status(&self, message_id: Snowflake, status: MessageStatus) -> BackendResult<()> {
        let request = self
            .client
            .put(self.url(&format!("/messages/{message_id}/status")))
            .json(&SetStatusRequest { status });
        self.send(request, Subject::Message(message_id)).await?;
        Ok(())
    }

    async fn set_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()> {
        let request = self
            .client
            .put(self.url(&format!("/messages/{message_id}/reactions")))
            .json(&ReactionRequest { emoji });
        self.send(request, Subject::Message(message_id)).await?;
        Ok(())
    }

    async fn clear_reaction(&self, message_id: Snowflake, emoji: &str) -> BackendResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/messages/{message_id}/reactions")))
            .json(&ReactionRequest { emoji });
        self.send(request, Subject::Message(message_id)).await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: Snowflake, scope: DeleteScope) -> BackendResult<()> {
        let request = self.client.delete(self.url(&format!(
            "/messages/{message_id}?scope={}",
            scope.as_str()
        )));
        self.send(request, Subject::Message(message_id)).await?;
        Ok(())
    }
}
