use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Part size for resumable (multipart) transfers. S3 requires at least 5 MiB
/// for every part but the last.
pub const RESUMABLE_PART_SIZE: usize = 8 * 1024 * 1024;

const ABORT_TIMEOUT: Duration = Duration::from_secs(30);

/// How an object should be written to durable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Send in independently retried parts instead of one request
    pub resumable: bool,
    /// Upper bound for the whole write, including commit
    pub timeout: Duration,
}

/// Durable object storage as seen by the transfer pipeline.
///
/// Implementations are shared by every in-flight transfer and must be safe to
/// call concurrently. A `put_object` either commits the whole object or leaves
/// nothing visible under `key`.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn file_exists(&self, key: &str) -> Result<bool>;
    async fn put_object<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        size: u64,
        options: PutOptions,
    ) -> Result<()>;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    async fn put_single<'a>(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        size: u64,
    ) -> Result<()> {
        let mut data = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut data).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .content_length(data.len() as i64)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    async fn upload_parts<'a>(
        &self,
        key: &str,
        upload_id: &str,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<Vec<CompletedPart>> {
        let mut part_number = 1;
        let mut completed_parts = Vec::new();
        let mut buffer = vec![0u8; RESUMABLE_PART_SIZE];

        loop {
            let mut n = 0;
            while n < RESUMABLE_PART_SIZE {
                let read = reader.read(&mut buffer[n..]).await?;
                if read == 0 {
                    break;
                }
                n += read;
            }

            if n == 0 {
                break;
            }

            let upload_part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(ByteStream::from(buffer[..n].to_vec()))
                .part_number(part_number)
                .send()
                .await?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            part_number += 1;
        }

        if completed_parts.is_empty() {
            return Err(anyhow!("Resumable transfer of {} read no data", key));
        }

        Ok(completed_parts)
    }

    async fn put_resumable<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        timeout: Duration,
    ) -> Result<()> {
        let mut upload_id = None;

        let result = match tokio::time::timeout(
            timeout,
            self.run_multipart(key, reader, &mut upload_id),
        )
        .await
        {
            Ok(inner) => inner,
            Err(_) => Err(anyhow!("Resumable transfer timed out after {:?}", timeout)),
        };

        if let Err(e) = result {
            // Uploaded parts are invisible to readers until completion; abort
            // so they do not linger as billable storage.
            if let Some(upload_id) = upload_id {
                self.abort_multipart(key, &upload_id).await;
            }
            return Err(e);
        }

        Ok(())
    }

    /// Create, upload parts, complete. `upload_id` is filled in as soon as the
    /// upload exists so the caller can abort it.
    async fn run_multipart<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        upload_id: &mut Option<String>,
    ) -> Result<()> {
        let multipart_upload_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .send()
            .await?;

        let id = multipart_upload_res
            .upload_id()
            .ok_or_else(|| anyhow!("No upload ID"))?
            .to_string();
        *upload_id = Some(id.clone());

        let parts = self.upload_parts(key, &id, reader).await?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let abort = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send();

        match tokio::time::timeout(ABORT_TIMEOUT, abort).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(
                "Failed to abort multipart upload {} for {}: {:?}",
                upload_id,
                key,
                e
            ),
            Err(_) => tracing::warn!(
                "Abort of multipart upload {} for {} timed out",
                upload_id,
                key
            ),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn file_exists(&self, key: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow!(service_error))
                }
            }
        }
    }

    async fn put_object<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        size: u64,
        options: PutOptions,
    ) -> Result<()> {
        if options.resumable {
            return self.put_resumable(key, reader, options.timeout).await;
        }

        tokio::time::timeout(options.timeout, self.put_single(key, reader, size))
            .await
            .map_err(|_| anyhow!("Transfer timed out after {:?}", options.timeout))?
    }
}

/// Content type recorded on the stored object, guessed from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit('.').next().unwrap_or("").to_lowercase();
    match extension.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
