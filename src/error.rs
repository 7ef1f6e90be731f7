use crate::middleware::error_handling;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("caller is not a participant in this conversation")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("users are not matched and cannot start a conversation")]
    NotMatched,

    #[error("rate limit exceeded, remaining messages: {remaining}, resets in: {reset_seconds} seconds")]
    RateLimited { remaining: i64, reset_seconds: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Transient store failures the caller may retry; everything else is
    /// terminal for the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            AppError::Internal => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) | AppError::NotMatched => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::RateLimited { .. } => 429,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(AppError::Forbidden.status_code(), 403);
    }

    #[test]
    fn not_matched_is_a_validation_failure() {
        assert_eq!(AppError::NotMatched.status_code(), 400);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = AppError::RateLimited {
            remaining: 0,
            reset_seconds: 42,
        };
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn pool_timeout_is_retryable() {
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!AppError::Forbidden.is_retryable());
    }
}
