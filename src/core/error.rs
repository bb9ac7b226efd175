//! Error types and handling for the load balancer.
//!
//! This module provides a unified error type [`AppError`] that wraps the
//! failure modes of the proxy pipeline and implements proper HTTP response
//! conversion.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for
/// consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// A backend with the same identity is already registered
    #[error("backend {0} is already registered")]
    DuplicateId(u64),

    /// A status was published for an identity with no registered descriptor
    #[error("no backend registered for id {0}")]
    UnknownBackend(u64),

    /// The route's healthy subset is empty
    #[error("no healthy backends available")]
    NoHealthyBackends,

    /// The strategy was handed an empty candidate list
    #[error("no backends available")]
    NoBackends,

    /// Transport-level failure talking to a backend
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Request rejected by the rate limiter
    #[error("rate limit exceeded")]
    RateLimited,

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::DuplicateId(_) | AppError::UnknownBackend(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::NoHealthyBackends | AppError::NoBackends => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Upstream(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
