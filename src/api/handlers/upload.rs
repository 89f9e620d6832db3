use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    extract::{Multipart, State},
    http::{HeaderMap, header},
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

/// Multipart fields accepted as the uploaded file, in order of preference.
pub const FILE_FIELDS: &[&str] = &["audio_file", "file"];

pub const UPLOAD_STARTED_MESSAGE: &str = "File uploaded successfully! Processing started.";

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// Generated key the file is stored under
    pub filename: String,
    /// Size in megabytes, two decimals
    pub size_mb: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "Audio file in the `audio_file` (or `file`) field"),
    responses(
        (status = 200, description = "File staged, transfer started", body = UploadResponse),
        (status = 400, description = "No file or unsupported file type", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 500, description = "File could not be staged", body = ErrorResponse)
    ),
    tag = "upload"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let max_size = state.config.max_file_size as u64;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::from_multipart(e, max_size))?
    {
        let name = field.name().unwrap_or_default();
        if !FILE_FIELDS.contains(&name) {
            continue;
        }

        let filename = field.file_name().map(|s| s.to_string());
        let body = StreamReader::new(field.map_err(std::io::Error::other));

        let receipt = state
            .upload_service
            .accept(filename.as_deref(), declared_size, body)
            .await?;

        return Ok(Json(UploadResponse {
            success: true,
            message: UPLOAD_STARTED_MESSAGE.to_string(),
            size_mb: receipt.size_mb(),
            filename: receipt.key,
        }));
    }

    Err(AppError::BadRequest(
        crate::services::upload_service::NO_FILE_SELECTED.to_string(),
    ))
}
