use crate::services::staging::StagingError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Message returned for any failure whose detail must stay server-side.
pub const GENERIC_UPLOAD_FAILURE: &str = "Upload failed. Please try again.";

pub const MALFORMED_UPLOAD: &str = "Malformed upload request.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Staging(StagingError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Staging(StagingError::Body(e)) if is_length_limit(e) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::Staging(StagingError::Body(_)) => StatusCode::BAD_REQUEST,
            AppError::Staging(StagingError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a multipart parse failure. Body-limit hits become 413; anything
    /// else is a malformed request, with the parser detail kept in the logs.
    pub fn from_multipart(e: MultipartError, max_size: u64) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            tracing::info!("Rejecting upload over the body limit: {}", e.body_text());
            AppError::PayloadTooLarge(too_large_message(max_size))
        } else {
            tracing::warn!("Malformed multipart request: {}", e.body_text());
            AppError::BadRequest(MALFORMED_UPLOAD.to_string())
        }
    }
}

/// The field stream is wrapped as `io::Error::other(MultipartError)`; a body
/// limit hit mid-stream is recovered from the inner error, not its text.
fn is_length_limit(e: &std::io::Error) -> bool {
    e.get_ref()
        .and_then(|inner| inner.downcast_ref::<MultipartError>())
        .is_some_and(|m| m.status() == StatusCode::PAYLOAD_TOO_LARGE)
}

pub fn too_large_message(max_size: u64) -> String {
    format!(
        "File too large. Maximum size is {} MB.",
        max_size / 1024 / 1024
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::PayloadTooLarge(msg) => msg,
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                GENERIC_UPLOAD_FAILURE.to_string()
            }
            AppError::Staging(StagingError::TooLarge { max, .. }) => too_large_message(max),
            AppError::Staging(StagingError::Body(e)) => {
                tracing::warn!("Upload body interrupted: {}", e);
                if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "Request body exceeds the maximum allowed limit".to_string()
                } else {
                    GENERIC_UPLOAD_FAILURE.to_string()
                }
            }
            AppError::Staging(StagingError::Io(e)) => {
                tracing::error!("Staging I/O error: {:?}", e);
                GENERIC_UPLOAD_FAILURE.to_string()
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
