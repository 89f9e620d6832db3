use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which durable object store transfers are sent to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// S3-compatible bucket (AWS, MinIO, ...)
    S3,
    /// Directory on the local filesystem, for development
    Local,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "s3" | "minio" => Some(Self::S3),
            "local" | "fs" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Configuration for upload admission and background transfer
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum upload size in bytes (default: 500 MB)
    pub max_file_size: usize,

    /// Directory where uploads are staged before transfer (default: <tmp>/uploads)
    pub staging_dir: PathBuf,

    /// Read/write chunk size used while staging (default: 8 KiB)
    pub staging_chunk_size: usize,

    /// Lower-case file extensions accepted by the validator
    pub allowed_extensions: BTreeSet<String>,

    /// Namespace prepended to every destination key (default: "audio-uploads")
    pub destination_prefix: String,

    /// Files larger than this use resumable transfers (default: 8 MiB)
    pub resumable_threshold: u64,

    /// Timeout for resumable transfers (default: 1 hour)
    pub resumable_timeout: Duration,

    /// Timeout for single-shot transfers (default: 5 minutes)
    pub single_shot_timeout: Duration,

    /// Age after which leftover staged files are swept (default: 24 hours)
    pub staging_sweep_age: Duration,

    /// How long shutdown waits for in-flight transfers (default: 30 seconds)
    pub shutdown_grace: Duration,

    /// Durable storage backend (default: s3)
    pub storage_backend: StorageBackend,

    /// Root directory of the local storage backend
    pub local_storage_root: PathBuf,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "aac"];

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 500 * 1024 * 1024, // 500 MB
            staging_dir: env::temp_dir().join("uploads"),
            staging_chunk_size: 8 * 1024, // 8 KiB
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            destination_prefix: "audio-uploads".to_string(),
            resumable_threshold: 8 * 1024 * 1024, // 8 MiB
            resumable_timeout: Duration::from_secs(3600),
            single_shot_timeout: Duration::from_secs(300),
            staging_sweep_age: Duration::from_secs(24 * 3600),
            shutdown_grace: Duration::from_secs(30),
            storage_backend: StorageBackend::S3,
            local_storage_root: env::temp_dir().join("audio-intake-objects"),
            allowed_origins: vec![
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: parse_var("MAX_FILE_SIZE").unwrap_or(default.max_file_size),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            staging_chunk_size: parse_var("STAGING_CHUNK_SIZE")
                .filter(|size: &usize| *size > 0)
                .unwrap_or(default.staging_chunk_size),

            allowed_extensions: env::var("ALLOWED_EXTENSIONS")
                .ok()
                .map(|v| parse_extensions(&v))
                .filter(|set| !set.is_empty())
                .unwrap_or(default.allowed_extensions),

            destination_prefix: env::var("DESTINATION_PREFIX")
                .map(|v| v.trim_matches('/').to_string())
                .unwrap_or(default.destination_prefix),

            resumable_threshold: parse_var("RESUMABLE_THRESHOLD")
                .unwrap_or(default.resumable_threshold),

            resumable_timeout: parse_var("RESUMABLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.resumable_timeout),

            single_shot_timeout: parse_var("SINGLE_SHOT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.single_shot_timeout),

            staging_sweep_age: parse_var("STAGING_SWEEP_AGE_HOURS")
                .map(hours)
                .unwrap_or(default.staging_sweep_age),

            shutdown_grace: parse_var("SHUTDOWN_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.shutdown_grace),

            storage_backend: env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|v| StorageBackend::parse(&v))
                .unwrap_or(default.storage_backend),

            local_storage_root: env::var("LOCAL_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.local_storage_root),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (local object store, short sweep age)
    pub fn development() -> Self {
        Self {
            storage_backend: StorageBackend::Local,
            staging_sweep_age: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Full destination key for a staged key, e.g. `audio-uploads/<key>`
    pub fn destination_key(&self, key: &str) -> String {
        if self.destination_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.destination_prefix, key)
        }
    }
}

fn hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_extensions(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
