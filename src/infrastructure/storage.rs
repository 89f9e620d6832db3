use crate::config::{StorageBackend, UploadConfig};
use crate::services::local_storage::LocalStorageService;
use crate::services::storage::{S3StorageService, StorageService};
use anyhow::{Context, Result};
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Builds the single storage client shared by every transfer.
pub async fn setup_storage(config: &UploadConfig) -> Result<Arc<dyn StorageService>> {
    let storage: Arc<dyn StorageService> = match config.storage_backend {
        StorageBackend::S3 => setup_s3().await?,
        StorageBackend::Local => {
            let root = &config.local_storage_root;
            tokio::fs::create_dir_all(root)
                .await
                .with_context(|| format!("Failed to create local storage root {:?}", root))?;
            info!("📁 Local object storage: {:?}", root);
            Arc::new(LocalStorageService::new(root.clone()))
        }
    };
    Ok(storage)
}

async fn setup_s3() -> Result<Arc<S3StorageService>> {
    let bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
    let region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
    let endpoint_url = env::var("S3_ENDPOINT").ok();

    let mut loader = aws_config::from_env().region(Region::new(region));
    if let Some(endpoint) = &endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Ok(access_key), Ok(secret_key)) =
        (env::var("S3_ACCESS_KEY"), env::var("S3_SECRET_KEY"))
    {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }
    let aws_config = loader.load().await;

    info!(
        "☁️  S3 Storage: {} (Bucket: {})",
        endpoint_url.as_deref().unwrap_or("aws"),
        bucket
    );

    // Custom endpoints (MinIO and friends) need path-style addressing
    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    // Ensure bucket exists
    match s3_client.head_bucket().bucket(&bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(_) => {
            info!("🪣 Bucket '{}' not found, creating...", bucket);
            if let Err(e) = s3_client.create_bucket().bucket(&bucket).send().await {
                tracing::error!("❌ Failed to create bucket '{}': {}", bucket, e);
            } else {
                info!("✅ Bucket '{}' created successfully", bucket);
            }
        }
    }

    Ok(Arc::new(S3StorageService::new(s3_client, bucket)))
}
