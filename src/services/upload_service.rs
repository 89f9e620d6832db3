use crate::api::error::{AppError, too_large_message};
use crate::config::UploadConfig;
use crate::services::staging::StagingWriter;
use crate::services::storage::StorageService;
use crate::services::transfer::{TransferJob, TransferWorker};
use crate::utils::keys::make_key;
use crate::utils::validation::{describe_extensions, is_allowed, sanitize_filename};
use std::sync::Arc;
use tokio::io::AsyncRead;

pub const NO_FILE_SELECTED: &str = "No file selected";

/// What the client is told once an upload is staged and handed off.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
}

impl UploadReceipt {
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size as f64 / 1024.0 / 1024.0)
    }
}

/// Admits uploads, stages them and dispatches the background transfer.
pub struct UploadService {
    config: UploadConfig,
    staging: StagingWriter,
    transfers: TransferWorker,
}

impl UploadService {
    pub fn new(storage: Arc<dyn StorageService>, config: UploadConfig) -> Self {
        let staging = StagingWriter::from_config(&config);
        let transfers = TransferWorker::new(storage, &config);
        Self {
            config,
            staging,
            transfers,
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingWriter {
        &self.staging
    }

    pub fn transfers(&self) -> &TransferWorker {
        &self.transfers
    }

    /// Validation gates that run before any byte is written, in order:
    /// missing name, declared size, extension. Returns the sanitized name.
    pub fn admit(
        &self,
        filename: Option<&str>,
        declared_size: Option<u64>,
    ) -> Result<String, AppError> {
        let filename = match filename {
            Some(name) if !name.is_empty() => name,
            _ => return Err(AppError::BadRequest(NO_FILE_SELECTED.to_string())),
        };

        let max = self.staging.max_size();
        if declared_size.is_some_and(|size| size > max) {
            tracing::info!(
                "Rejecting {}: declared size {:?} exceeds {} bytes",
                filename,
                declared_size,
                max
            );
            return Err(AppError::PayloadTooLarge(too_large_message(max)));
        }

        if !is_allowed(filename, &self.config.allowed_extensions) {
            return Err(AppError::BadRequest(format!(
                "Invalid file type. Please upload {} files.",
                describe_extensions(&self.config.allowed_extensions)
            )));
        }

        sanitize_filename(filename).map_err(|e| {
            tracing::info!("Rejecting filename {:?}: {}", filename, e);
            AppError::BadRequest(NO_FILE_SELECTED.to_string())
        })
    }

    /// Runs the whole admission pipeline for one upload and returns as soon as
    /// the transfer is dispatched. The transfer itself is never awaited.
    pub async fn accept<R>(
        &self,
        filename: Option<&str>,
        declared_size: Option<u64>,
        body: R,
    ) -> Result<UploadReceipt, AppError>
    where
        R: AsyncRead + Unpin,
    {
        let safe_name = self.admit(filename, declared_size)?;

        let key = make_key(&safe_name);
        let staged = self.staging.stage(body, declared_size, &key).await?;
        tracing::info!("📥 File staged: {} ({} bytes)", staged.key, staged.size);

        let receipt = UploadReceipt {
            key: staged.key.clone(),
            size: staged.size,
        };

        let destination_key = self.config.destination_key(&staged.key);
        // Fire-and-forget: the handle is dropped, the tracker keeps the task.
        let _ = self.transfers.dispatch(TransferJob {
            staged,
            destination_key,
        });

        Ok(receipt)
    }
}
