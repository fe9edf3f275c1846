use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use consoul_audit::iso8601_now;
use consoul_store::SessionStoreError;
use serde::Serialize;
use thiserror::Error;

use crate::conversation::ConversationError;

/// Maps the error taxonomy onto HTTP status codes (§7): validation 422,
/// auth 401, storage 503, provider 502, circuit-open 503, token limit 400,
/// rate limited 429, not found 404, everything else 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("authentication required")]
    Auth,
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("circuit breaker open for provider '{0}'")]
    CircuitOpen(String),
    #[error("token limit exceeded: {0}")]
    TokenLimit(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Auth => "auth_error",
            ApiError::Storage(_) => "storage_error",
            ApiError::Provider(_) => "provider_error",
            ApiError::CircuitOpen(_) => "circuit_open",
            ApiError::TokenLimit(_) => "token_limit_exceeded",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Provider(_) => StatusCode::BAD_GATEWAY,
            ApiError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::TokenLimit(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(e: SessionStoreError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

impl From<ConversationError> for ApiError {
    fn from(e: ConversationError) -> Self {
        match e {
            ConversationError::Validation(msg) => ApiError::Validation(msg),
            ConversationError::Storage(msg) => ApiError::Storage(msg),
            ConversationError::Provider(msg) => ApiError::Provider(msg),
            ConversationError::CircuitOpen(provider) => ApiError::CircuitOpen(provider),
            ConversationError::TokenLimit(msg) => ApiError::TokenLimit(msg),
            ConversationError::UnknownModel(model) => ApiError::Validation(format!("unknown model '{model}'")),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    timestamp: String,
    correlation_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            timestamp: iso8601_now(),
            correlation_id: None,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = axum::http::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
