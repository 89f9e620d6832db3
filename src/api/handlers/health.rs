use axum::{Json, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Liveness only. Storage and disk are not probed.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}
