//! HTTP error type.
//!
//! Every handler returns `Result<T, ApiError>`. Rejections and missing
//! artifacts carry their message to the client; internal errors are logged in
//! full and answered with a generic message so server paths never leak.

use crate::error::ConvertError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was rejected before any conversion ran.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The requested artifact does not exist or has expired.
    #[error("not found: {0}")]
    NotFound(String),

    /// The upload exceeded the body limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// A conversion ran and failed.
    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        match e {
            ConvertError::Validation(_)
            | ConvertError::RoutingGap { .. }
            | ConvertError::InvalidParameter { .. } => ApiError::BadRequest(e.to_string()),
            ConvertError::OperationFailure { .. } | ConvertError::OutputMissing { .. } => {
                ApiError::Unprocessable(e.to_string())
            }
            ConvertError::Io { .. } | ConvertError::InvalidConfig(_) | ConvertError::Internal(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(e.body_text())
        } else {
            ApiError::BadRequest(format!("Failed to read multipart field: {}", e.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, client_message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
