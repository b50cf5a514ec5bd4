//! REST backend against a stub HTTP server

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use chat_common::ErrorResponse;
use chat_core::{
    ConversationSummary, CorrelationToken, DeleteScope, DomainError, Message, MessagePayload,
    MessageStatus, Snowflake, SyncBackend,
};
use chat_sync::RestBackend;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;

const TOKEN: &str = "stub-token";
const VIEWER: Snowflake = Snowflake::new(3001);
const PEER: Snowflake = Snowflake::new(3002);
const CONVERSATION: Snowflake = Snowflake::new(3100);
const MISSING: Snowflake = Snowflake::new(404);
const BROKEN: Snowflake = Snowflake::new(503);
const CROWDED: Snowflake = Snowflake::new(409);

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: Option<String>,
    body: Value,
}

#[derive(Default)]
struct Stub {
    requests: Mutex<Vec<Recorded>>,
}

impl Stub {
    fn last(&self) -> Recorded {
        self.requests.lock().last().cloned().expect("no request recorded")
    }
}

fn error(status: StatusCode, code: &str) -> Response {
    (status, Json(ErrorResponse::new(code, format!("stub {code}")))).into_response()
}

fn summary(id: Snowflake) -> ConversationSummary {
    ConversationSummary {
        id,
        participant_id: PEER,
        last_message: None,
        unread_count: 2,
        last_activity: id.created_at(),
    }
}

async fn handle(
    State(stub): State<Arc<Stub>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    stub.requests.lock().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        body: body.clone(),
    });

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return error(StatusCode::UNAUTHORIZED, "INVALID_TOKEN");
    }

    let segments: Vec<&str> = uri.path().trim_start_matches('/').split('/').collect();
    let id = |i: usize| -> Snowflake { segments[i].parse().unwrap() };

    match (method, segments.as_slice()) {
        (Method::GET, ["conversations"]) => Json(vec![summary(CONVERSATION)]).into_response(),
        (Method::GET, ["conversations", _]) if id(1) == MISSING => {
            error(StatusCode::NOT_FOUND, "NOT_FOUND")
        }
        (Method::GET, ["conversations", _]) => Json(summary(id(1))).into_response(),
        (Method::GET, ["conversations", _, "messages"]) if id(1) == BROKEN => {
            error(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
        (Method::GET, ["conversations", _, "messages"]) => {
            let message = Message::new(
                Snowflake::new(5000),
                id(1),
                PEER,
                VIEWER,
                MessagePayload::text("from the stub"),
            );
            Json(vec![message]).into_response()
        }
        (Method::POST, ["conversations", _, "messages"]) => {
            let payload: MessagePayload = serde_json::from_value(body["payload"].clone()).unwrap();
            let token: CorrelationToken =
                serde_json::from_value(body["correlation"].clone()).unwrap();
            let message = Message::new(Snowflake::new(5001), id(1), VIEWER, PEER, payload)
                .with_correlation(token);
            (StatusCode::CREATED, Json(message)).into_response()
        }
        (Method::PUT, ["messages", _, "reactions"]) if id(1) == CROWDED => {
            error(StatusCode::CONFLICT, "REACTION_TYPE_LIMIT_EXCEEDED")
        }
        (Method::PUT, ["messages", _, "status" | "reactions"])
        | (Method::DELETE, ["messages", _, "reactions"]) => StatusCode::NO_CONTENT.into_response(),
        (Method::DELETE, ["messages", _]) if id(1) == MISSING => {
            error(StatusCode::NOT_FOUND, "NOT_FOUND")
        }
        (Method::DELETE, ["messages", _]) => StatusCode::NO_CONTENT.into_response(),
        _ => error(StatusCode::METHOD_NOT_ALLOWED, "UNSUPPORTED"),
    }
}

async fn start_stub() -> (Arc<Stub>, String) {
    let stub = Arc::new(Stub::default());
    let app = Router::new().fallback(handle).with_state(stub.clone());
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (stub, format!("http://{addr}/"))
}

async fn backend() -> (Arc<Stub>, RestBackend) {
    let (stub, url) = start_stub().await;
    (stub, RestBackend::new(url, TOKEN).unwrap())
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_fetch_conversations() {
    let (stub, backend) = backend().await;

    let summaries = backend.fetch_conversations().await.unwrap();

    assert_eq!(summaries, vec![summary(CONVERSATION)]);
    let request = stub.last();
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.path, "/conversations");
}

#[tokio::test]
async fn test_fetch_messages() {
    let (stub, backend) = backend().await;

    let messages = backend.fetch_messages(CONVERSATION).await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].conversation_id, CONVERSATION);
    assert_eq!(messages[0].payload.body, "from the stub");
    assert_eq!(stub.last().path, format!("/conversations/{CONVERSATION}/messages"));
}

#[tokio::test]
async fn test_missing_conversation_maps_to_not_found() {
    let (_stub, backend) = backend().await;

    let err = backend.fetch_conversation(MISSING).await.unwrap_err();

    assert_eq!(err, DomainError::ConversationNotFound(MISSING));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let (_stub, backend) = backend().await;

    let err = backend.fetch_messages(BROKEN).await.unwrap_err();

    assert!(matches!(err, DomainError::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let backend = RestBackend::new(format!("http://{addr}"), TOKEN).unwrap();

    let err = backend.fetch_conversations().await.unwrap_err();

    assert!(matches!(err, DomainError::Transport(_)));
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let (_stub, url) = start_stub().await;
    let backend = RestBackend::new(url, "wrong").unwrap();

    let err = backend.fetch_conversations().await.unwrap_err();

    assert!(matches!(err, DomainError::Rejected { ref code, .. } if code == "INVALID_TOKEN"));
    assert!(!err.is_transient());
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_send_message_carries_correlation() {
    let (stub, backend) = backend().await;
    let token = CorrelationToken::new();

    let message = backend
        .send_message(CONVERSATION, &MessagePayload::text("hi"), token)
        .await
        .unwrap();

    assert_eq!(message.correlation, Some(token));
    assert_eq!(message.payload.body, "hi");
    let request = stub.last();
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.path, format!("/conversations/{CONVERSATION}/messages"));
    assert_eq!(request.body["correlation"], token.to_string());
}

#[tokio::test]
async fn test_set_status() {
    let (stub, backend) = backend().await;
    let message_id = Snowflake::new(42);

    backend.set_status(message_id, MessageStatus::Read).await.unwrap();

    let request = stub.last();
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.path, "/messages/42/status");
    assert_eq!(request.body, serde_json::json!({ "status": "read" }));
}

#[tokio::test]
async fn test_reactions() {
    let (stub, backend) = backend().await;
    let message_id = Snowflake::new(43);

    backend.set_reaction(message_id, "👍").await.unwrap();
    let request = stub.last();
    assert_eq!(request.method, Method::PUT);
    assert_eq!(request.path, "/messages/43/reactions");
    assert_eq!(request.body["emoji"], "👍");

    backend.clear_reaction(message_id, "👍").await.unwrap();
    assert_eq!(stub.last().method, Method::DELETE);
}

#[tokio::test]
async fn test_reaction_limit_names_the_message() {
    let (_stub, backend) = backend().await;

    let err = backend.set_reaction(CROWDED, "🎉").await.unwrap_err();

    assert_eq!(
        err,
        DomainError::ReactionTypeLimitExceeded {
            message_id: CROWDED
        }
    );
    assert!(err.is_invariant());
}

#[tokio::test]
async fn test_delete_message_scope() {
    let (stub, backend) = backend().await;

    backend
        .delete_message(Snowflake::new(44), DeleteScope::ForEveryone)
        .await
        .unwrap();
    let request = stub.last();
    assert_eq!(request.method, Method::DELETE);
    assert_eq!(request.path, "/messages/44");
    assert_eq!(request.query.as_deref(), Some("scope=for_everyone"));

    let err = backend
        .delete_message(MISSING, DeleteScope::ForMe)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::MessageNotFound(MISSING));
}
