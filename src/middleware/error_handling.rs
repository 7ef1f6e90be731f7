use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::error::AppError;

/// Wire shape for every error response. Rate-limit rejections additionally
/// carry the caller's remaining quota and window reset.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: u16,
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_seconds: Option<i64>,
}

fn error_kind(err: &AppError) -> &'static str {
    match err {
        AppError::Validation(_) => "validation_error",
        AppError::NotMatched => "not_matched",
        AppError::Unauthorized => "unauthorized",
        AppError::Forbidden => "forbidden",
        AppError::NotFound => "not_found",
        AppError::RateLimited { .. } => "rate_limited",
        _ => "internal_error",
    }
}

/// Map a domain error to its HTTP response. 5xx details are logged but never
/// echoed to the caller.
pub fn into_response(err: AppError) -> (StatusCode, Json<ErrorBody>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let (remaining, reset_seconds) = match &err {
        AppError::RateLimited {
            remaining,
            reset_seconds,
        } => (Some(*remaining), Some(*reset_seconds)),
        _ => (None, None),
    };

    let message = if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
        "internal server error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorBody {
            status: status.as_u16(),
            error: error_kind(&err),
            message,
            remaining,
            reset_seconds,
        }),
    )
}
