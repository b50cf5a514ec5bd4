//! Internal publish endpoint
//!
//! `POST /events` is the ingress of the push channel: the authoritative backend posts a
//! [`RoutedEvent`] and the gateway fans it out to the recipients' live connections.
//! It is meant for the private network only and carries no authentication.

use crate::broadcast::RoutedEvent;
use crate::server::GatewayState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_common::ErrorResponse;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Connections the event was queued on
    pub delivered: usize,
}

/// Errors of the HTTP surface
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBody(_) => "VALIDATION_ERROR",
            Self::Encode(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Publish failed");
        }
        let body = ErrorResponse::new(self.error_code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

pub(super) async fn publish_event(
    State(state): State<GatewayState>,
    body: Result<Json<RoutedEvent>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let Json(routed) = body?;
    let delivered = state.event_dispatcher().publish(&routed).await?;
    Ok(Json(PublishResponse { delivered }))
}
