use audio_intake::config::UploadConfig;
use audio_intake::infrastructure::storage;
use audio_intake::services::sweeper::{StagingSweeper, sweep_once};
use audio_intake::services::upload_service::UploadService;
use audio_intake::{AppState, create_app};
use clap::Parser;
use dotenvy::dotenv;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the API server
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging Setup
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_intake=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Audio Intake...");

    // 2. Configuration & Storage
    let config = UploadConfig::from_env();
    info!(
        "🛡️  Upload Config: Max Size={}MB, Extensions={:?}, Destination=/{}/, Resumable>{}MB",
        config.max_file_size / 1024 / 1024,
        config.allowed_extensions,
        config.destination_prefix,
        config.resumable_threshold / 1024 / 1024
    );

    let storage_service = storage::setup_storage(&config).await?;
    let upload_service = Arc::new(UploadService::new(storage_service, config.clone()));

    upload_service.staging().ensure_dir().await?;
    info!("📂 Staging directory: {:?}", config.staging_dir);

    // Reclaim files orphaned by a previous crash before accepting uploads
    match sweep_once(&config.staging_dir, config.staging_sweep_age).await {
        Ok(0) => {}
        Ok(n) => warn!("🧹 Removed {} stale staged file(s) at startup", n),
        Err(e) => warn!("Startup staging sweep failed: {}", e),
    }

    // 3. Graceful Shutdown Channel & Sweeper
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = StagingSweeper::new(
        config.staging_dir.clone(),
        config.staging_sweep_age,
        shutdown_rx,
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    // 4. API Server
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(AppState::new(upload_service.clone())).layer(trace_layer);
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://{}", addr);
    info!("📖 Swagger UI documentation: http://{}/swagger-ui", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server runtime error: {}", e);
    }

    // 5. Drain in-flight transfers
    info!("🛑 Shutting down, stopping staging sweeper...");
    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;

    let transfers = upload_service.transfers();
    let pending = transfers.in_flight();
    if pending > 0 {
        info!(
            "⏳ Waiting up to {:?} for {} in-flight transfer(s)...",
            config.shutdown_grace, pending
        );
    }
    if !transfers.drain(config.shutdown_grace).await {
        warn!(
            "⚠️  {} transfer(s) still running at shutdown; their staged files are left for the next sweep",
            transfers.in_flight()
        );
    }

    info!("👋 Audio Intake exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
