use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::sleep;

/// Periodically deletes staged files that outlived any possible transfer,
/// e.g. ones left behind when the process died mid-transfer.
pub struct StagingSweeper {
    dir: PathBuf,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(dir: PathBuf, max_age: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            dir,
            max_age,
            interval: Duration::from_secs(3600),
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started for {:?}", self.dir);

        loop {
            self.perform_sweep().await;

            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {}
            }
        }
    }

    async fn perform_sweep(&self) {
        match sweep_once(&self.dir, self.max_age).await {
            Ok(0) => tracing::debug!("Staging sweep found nothing to remove"),
            Ok(removed) => tracing::warn!("🧹 Removed {} stale staged file(s)", removed),
            Err(e) => tracing::error!("Staging sweep of {:?} failed: {}", self.dir, e),
        }
    }
}

/// Removes regular files in `dir` last modified more than `max_age` ago.
/// Returns how many were removed.
pub async fn sweep_once(dir: &std::path::Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();

        if age > max_age {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    tracing::info!("Removing stale staged file {:?} (age {:?})", entry.path(), age);
                    removed += 1;
                }
                // A transfer may have cleaned it up meanwhile
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", entry.path(), e),
            }
        }
    }

    Ok(removed)
}
