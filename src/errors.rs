use crate::rate_limit::RateLimitError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Message returned to clients that exhausted their budget
pub const RATE_LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Application-wide error type
#[derive(Debug)]
pub enum AppError {
    // Limiter errors
    RateLimit(RateLimitError),

    // Redis errors
    Redis(redis::RedisError),

    // Request denied by the limiter
    RateLimitExceeded,

    // Configuration errors
    Configuration(String),

    // Internal errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::RateLimit(e) => write!(f, "Rate limiter error: {}", e),
            AppError::Redis(e) => write!(f, "Redis error: {}", e),
            AppError::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

// Convert from various error types
impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        AppError::RateLimit(err)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Redis(err)
    }
}

// Implement IntoResponse for Axum
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_EXCEEDED_MESSAGE)
            }
            // Any failure to reach a verdict denies the request
            AppError::RateLimit(_) | AppError::Redis(_) => {
                tracing::error!("Rate limiter error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Configuration(_) => {
                tracing::error!("Configuration error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
            AppError::Internal(_) => {
                tracing::error!("Internal error: {:?}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;
