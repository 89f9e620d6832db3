use crate::config::UploadConfig;
use crate::services::staging::StagedFile;
use crate::services::storage::{PutOptions, StorageService};
use anyhow::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// Lifecycle of a single transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Staged,
    CheckingExistence,
    Skipping,
    Uploading,
    Cleanup,
    Done,
    Failed,
}

/// Terminal result of a transfer job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Object written to durable storage
    Uploaded,
    /// An object already existed at the destination key
    SkippedDuplicate,
    /// Existence check or upload failed; nothing was retried
    Failed { reason: String },
}

impl TransferOutcome {
    pub fn final_state(&self) -> TransferState {
        match self {
            TransferOutcome::Uploaded | TransferOutcome::SkippedDuplicate => TransferState::Done,
            TransferOutcome::Failed { .. } => TransferState::Failed,
        }
    }
}

/// A staged file bound to its destination key. Owns the staged file, so a
/// job can only be created once per upload.
#[derive(Debug)]
pub struct TransferJob {
    pub staged: StagedFile,
    pub destination_key: String,
}

/// Moves staged files into durable storage in the background.
///
/// Cheap to clone; clones share the storage client and the task tracker, so
/// every job spawned through any clone is awaited by [`TransferWorker::drain`].
#[derive(Clone)]
pub struct TransferWorker {
    storage: Arc<dyn StorageService>,
    resumable_threshold: u64,
    resumable_timeout: Duration,
    single_shot_timeout: Duration,
    tracker: TaskTracker,
}

impl TransferWorker {
    pub fn new(storage: Arc<dyn StorageService>, config: &UploadConfig) -> Self {
        Self {
            storage,
            resumable_threshold: config.resumable_threshold,
            resumable_timeout: config.resumable_timeout,
            single_shot_timeout: config.single_shot_timeout,
            tracker: TaskTracker::new(),
        }
    }

    pub fn options_for(&self, size: u64) -> PutOptions {
        if size > self.resumable_threshold {
            PutOptions {
                resumable: true,
                timeout: self.resumable_timeout,
            }
        } else {
            PutOptions {
                resumable: false,
                timeout: self.single_shot_timeout,
            }
        }
    }

    /// Spawns the job as a detached task. Callers normally drop the handle;
    /// it is returned so tests can observe the outcome.
    pub fn dispatch(&self, job: TransferJob) -> JoinHandle<TransferOutcome> {
        let span = tracing::info_span!(
            "transfer",
            key = %job.staged.key,
            destination = %job.destination_key,
            size = job.staged.size,
        );
        let worker = self.clone();
        self.tracker
            .spawn(async move { worker.run(job).await }.instrument(span))
    }

    /// Runs a job to completion. The staged file is removed on every path.
    pub async fn run(&self, job: TransferJob) -> TransferOutcome {
        let TransferJob {
            staged,
            destination_key,
        } = job;

        tracing::debug!(state = ?TransferState::Staged, "Transfer job started");

        let attempt = AssertUnwindSafe(self.transfer(&staged, &destination_key))
            .catch_unwind()
            .await;

        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => TransferOutcome::Failed {
                reason: format!("{:#}", e),
            },
            Err(_) => TransferOutcome::Failed {
                reason: "transfer task panicked".to_string(),
            },
        };

        if let TransferOutcome::Failed { reason } = &outcome {
            tracing::error!(
                key = %staged.key,
                size = staged.size,
                destination = %destination_key,
                "❌ Transfer failed: {}",
                reason
            );
        }

        tracing::debug!(state = ?TransferState::Cleanup, "Removing staged file");
        let path = staged.path.clone();
        if let Err(e) = staged.remove().await {
            tracing::warn!("Failed to remove staged file {:?}: {}", path, e);
        } else {
            tracing::info!("🧹 Local staged file cleaned up: {:?}", path);
        }

        tracing::debug!(state = ?outcome.final_state(), "Transfer job finished");
        outcome
    }

    async fn transfer(&self, staged: &StagedFile, destination_key: &str) -> Result<TransferOutcome> {
        tracing::debug!(state = ?TransferState::CheckingExistence, "Checking destination");
        if self.storage.file_exists(destination_key).await? {
            tracing::info!(
                state = ?TransferState::Skipping,
                "Object already exists at {}, skipping duplicate",
                destination_key
            );
            return Ok(TransferOutcome::SkippedDuplicate);
        }

        let options = self.options_for(staged.size);
        tracing::info!(
            state = ?TransferState::Uploading,
            resumable = options.resumable,
            "Uploading {} ({:.2} MB) to {}",
            staged.key,
            staged.size_mb(),
            destination_key
        );

        let file = tokio::fs::File::open(&staged.path).await?;
        self.storage
            .put_object(destination_key, Box::new(file), staged.size, options)
            .await?;

        tracing::info!("✅ File uploaded to storage: {}", destination_key);
        Ok(TransferOutcome::Uploaded)
    }

    /// Number of transfers currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Closes the tracker and waits up to `grace` for running transfers.
    /// Returns `true` if all of them finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}
