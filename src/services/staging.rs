use crate::config::UploadConfig;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Upload of {size} bytes exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Failed to read upload body: {0}")]
    Body(#[source] std::io::Error),

    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An upload that has been fully written to the staging directory.
///
/// Not `Clone`: whoever holds the value owns the local file, and
/// [`StagedFile::remove`] consumes it so the file is deleted at most once.
#[derive(Debug)]
pub struct StagedFile {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl StagedFile {
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }

    pub async fn remove(self) -> std::io::Result<()> {
        tokio::fs::remove_file(&self.path).await
    }
}

/// Streams request bodies into uniquely named files under the staging directory.
#[derive(Debug, Clone)]
pub struct StagingWriter {
    dir: PathBuf,
    max_size: u64,
    chunk_size: usize,
}

impl StagingWriter {
    pub fn new(dir: impl Into<PathBuf>, max_size: u64, chunk_size: usize) -> Self {
        Self {
            dir: dir.into(),
            max_size,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.staging_dir.clone(),
            config.max_file_size as u64,
            config.staging_chunk_size,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Writes `body` to `<staging_dir>/<key>`.
    ///
    /// Creates exactly one file on success and none on failure. The declared
    /// size is checked before the file is created; the observed size is
    /// checked again while streaming.
    pub async fn stage<R>(
        &self,
        mut body: R,
        declared_size: Option<u64>,
        key: &str,
    ) -> Result<StagedFile, StagingError>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(size) = declared_size {
            if size > self.max_size {
                return Err(StagingError::TooLarge {
                    size,
                    max: self.max_size,
                });
            }
        }

        let path = self.dir.join(key);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let result = self.copy_body(&mut body, &mut file).await;
        drop(file);

        match result {
            Ok(size) => {
                tracing::debug!("Staged {} ({} bytes)", key, size);
                Ok(StagedFile {
                    key: key.to_string(),
                    path,
                    size,
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                if let Err(rm_err) = tokio::fs::remove_file(&path).await {
                    tracing::error!("Failed to remove partial staged file {:?}: {}", path, rm_err);
                }
                Err(e)
            }
        }
    }

    async fn copy_body<R>(
        &self,
        body: &mut R,
        file: &mut tokio::fs::File,
    ) -> Result<u64, StagingError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;

        loop {
            let n = body.read(&mut buffer).await.map_err(StagingError::Body)?;
            if n == 0 {
                break;
            }

            written += n as u64;
            if written > self.max_size {
                return Err(StagingError::TooLarge {
                    size: written,
                    max: self.max_size,
                });
            }

            file.write_all(&buffer[..n]).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}
