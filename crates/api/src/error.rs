//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::DomainError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable principal on a route that needs one.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Checkout(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg))
            }
        };
        (status, Json(body)).into_response()
    }
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, serde_json::Value) {
    let status = match &err {
        CheckoutError::Validation(_)
        | CheckoutError::InvalidTransition { .. }
        | CheckoutError::Signature { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::Forbidden(_) => StatusCode::FORBIDDEN,
        CheckoutError::NotFound { .. } => StatusCode::NOT_FOUND,
        CheckoutError::InsufficientStock { .. } | CheckoutError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        CheckoutError::Gateway(_) | CheckoutError::RefundFailed { .. } => StatusCode::BAD_GATEWAY,
        CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, status = status.as_u16(), "request failed");
    }

    let message = err.to_string();
    match err {
        CheckoutError::RefundFailed { order, .. } => (
            status,
            serde_json::json!({ "error": message, "order": order }),
        ),
        _ => (status, error_body(message)),
    }
}
