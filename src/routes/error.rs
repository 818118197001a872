//! HTTP error mapping
//!
//! Request and upstream failures keep their message; storage failures are
//! logged in full and reported generically.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::core::{ChatError, SessionError};

/// Non-standard "client closed request" status used for cancelled answers
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Chat(ChatError::BadRequest(rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Chat(ChatError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(ChatError::Unauthorized(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Chat(ChatError::UpstreamFailure(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Chat(ChatError::Cancelled { .. }) => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Chat(ChatError::Storage(_)) | ApiError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Chat(ChatError::BadRequest(_)) => "bad_request",
            ApiError::Chat(ChatError::Unauthorized(_)) => "unauthorized",
            ApiError::Chat(ChatError::UpstreamFailure(_)) => "upstream_failure",
            ApiError::Chat(ChatError::Cancelled { .. }) => "cancelled",
            ApiError::Chat(ChatError::Storage(_)) | ApiError::Session(_) => "internal",
            ApiError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();

        let body = match &self {
            ApiError::Chat(ChatError::Storage(m)) => {
                tracing::error!(message = %m, "session storage error");
                json!({ "error": "internal server error", "kind": kind })
            }
            ApiError::Session(e) => {
                tracing::error!(error = %e, "session storage error");
                json!({ "error": "internal server error", "kind": kind })
            }
            ApiError::Chat(ChatError::UpstreamFailure(e)) => {
                tracing::warn!(error = %e, "language model unavailable");
                json!({ "error": self.to_string(), "kind": kind })
            }
            ApiError::Chat(ChatError::Cancelled { reason, partial }) => json!({
                "error": self.to_string(),
                "kind": kind,
                "reason": reason,
                "partial": partial,
            }),
            _ => json!({ "error": self.to_string(), "kind": kind }),
        };

        (status, Json(body)).into_response()
    }
}
