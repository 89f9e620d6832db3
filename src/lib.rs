pub mod api;
pub mod config;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Room for multipart boundaries and part headers on top of the file itself
pub const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::UploadResponse,
            api::handlers::upload::ErrorResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Audio upload endpoints"),
        (name = "system", description = "Liveness")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub upload_service: Arc<UploadService>,
    pub config: UploadConfig,
}

impl AppState {
    pub fn new(upload_service: Arc<UploadService>) -> Self {
        let config = upload_service.config().clone();
        Self {
            upload_service,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(api::handlers::index::upload_page))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload",
            post(api::handlers::upload::upload_file).layer(DefaultBodyLimit::max(
                state.config.max_file_size.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST]),
        )
        .with_state(state)
}
