use crate::services::storage::{PutOptions, StorageService};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Object store backed by a local directory.
///
/// Objects are written to a temporary sibling and linked into place only once
/// fully written, so a reader never sees a partial object and an existing
/// object is never replaced.
pub struct LocalStorageService {
    root: PathBuf,
}

impl LocalStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(anyhow!("Invalid object key: {:?}", key));
        }
        Ok(self.root.join(relative))
    }

    async fn write_object<'a>(
        &self,
        destination: &Path,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<()> {
        let parent = destination
            .parent()
            .ok_or_else(|| anyhow!("Object path has no parent: {:?}", destination))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;

        let (std_file, temp_path) = tempfile::NamedTempFile::new_in(parent)?.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);

        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        // Dropping `temp_path` on any error above removes the temporary file.
        temp_path
            .persist_noclobber(destination)
            .map_err(|e| anyhow!("Failed to commit {:?}: {}", destination, e.error))?;
        Ok(())
    }
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn file_exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn put_object<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        _size: u64,
        options: PutOptions,
    ) -> Result<()> {
        let destination = self.object_path(key)?;
        tokio::time::timeout(options.timeout, self.write_object(&destination, reader))
            .await
            .map_err(|_| anyhow!("Transfer timed out after {:?}", options.timeout))?
    }
}
