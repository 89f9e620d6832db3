use async_trait::async_trait;
use audio_intake::config::UploadConfig;
use audio_intake::services::storage::{PutOptions, StorageService};
use audio_intake::services::upload_service::UploadService;
use audio_intake::{AppState, create_app};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------audiointake0123456789";

#[derive(Default)]
struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageService for MemoryStorage {
    async fn file_exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put_object<'a>(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        _size: u64,
        _options: PutOptions,
    ) -> anyhow::Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }
}

struct TestApp {
    app: Router,
    service: Arc<UploadService>,
    storage: Arc<MemoryStorage>,
    staging: TempDir,
}

fn setup(max_file_size: usize) -> TestApp {
    let staging = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryStorage::default());
    let config = UploadConfig {
        staging_dir: staging.path().to_path_buf(),
        max_file_size,
        ..UploadConfig::development()
    };
    let service = Arc::new(UploadService::new(storage.clone(), config));
    let app = create_app(AppState::new(service.clone()));
    TestApp {
        app,
        service,
        storage,
        staging,
    }
}

fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    multipart_with_note(b"field before the file", field, filename, data)
}

fn multipart_with_note(note: &[u8], field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(note);
    body.extend_from_slice(
        format!(
            "\r\n--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>, with_length: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if with_length {
        builder = builder.header(header::CONTENT_LENGTH, body.len());
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn staged_files(dir: &Path) -> usize {
    let mut entries = tokio::fs::read_dir(dir).await.unwrap();
    let mut count = 0;
    while entries.next_entry().await.unwrap().is_some() {
        count += 1;
    }
    count
}

async fn wait_for_empty_staging(dir: &Path) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while staged_files(dir).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("staging directory was not emptied");
}

#[tokio::test]
async fn test_upload_flow() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("audio_file", "clip.M4A", b"0123456789"),
            true,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "File uploaded successfully! Processing started."
    );
    assert_eq!(body["size_mb"], "0.00");

    let filename = body["filename"].as_str().unwrap();
    let pattern = Regex::new(r"^\d{8}_\d{6}_[0-9a-f]{8}_clip\.m4a$").unwrap();
    assert!(pattern.is_match(filename), "unexpected key {}", filename);

    wait_for_empty_staging(t.staging.path()).await;
    assert_eq!(
        t.storage.get(&format!("audio-uploads/{}", filename)).unwrap(),
        b"0123456789"
    );
}

#[tokio::test]
async fn test_legacy_file_field_is_accepted() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("file", "take two.wav", b"RIFF....WAVE"),
            true,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["filename"].as_str().unwrap().ends_with("_take two.wav"));

    assert!(t.service.transfers().drain(Duration::from_secs(5)).await);
    assert_eq!(t.storage.len(), 1);
    assert_eq!(staged_files(t.staging.path()).await, 0);
}

#[tokio::test]
async fn test_invalid_file_type_is_rejected() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("audio_file", "song.txt", b"not audio"),
            true,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(
        body["error"],
        "Invalid file type. Please upload AAC, M4A, MP3, or WAV files."
    );
    assert_eq!(staged_files(t.staging.path()).await, 0);
    assert_eq!(t.service.transfers().in_flight(), 0);
}

#[tokio::test]
async fn test_missing_file_field() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("attachment", "clip.mp3", b"abc"),
            true,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file selected");
    assert_eq!(staged_files(t.staging.path()).await, 0);
}

#[tokio::test]
async fn test_empty_filename() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(multipart_body("audio_file", "", b""), true))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "No file selected");
}

#[tokio::test]
async fn test_declared_size_over_limit() {
    let t = setup(64);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("audio_file", "clip.mp3", &[7u8; 200]),
            true,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("File too large"));
    assert_eq!(staged_files(t.staging.path()).await, 0);
    assert_eq!(t.service.transfers().in_flight(), 0);
    assert_eq!(t.storage.len(), 0);
}

#[tokio::test]
async fn test_streamed_size_over_limit_without_length() {
    let t = setup(64);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_body("audio_file", "clip.mp3", &[7u8; 200]),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(staged_files(t.staging.path()).await, 0);
    assert_eq!(t.storage.len(), 0);
}

#[tokio::test]
async fn test_body_over_limit_in_leading_field() {
    let t = setup(64);
    let note = vec![b'n'; 2 * 1024 * 1024];

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            multipart_with_note(&note, "audio_file", "clip.mp3", b"abc"),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("File too large"));
    assert_eq!(staged_files(t.staging.path()).await, 0);
    assert_eq!(t.storage.len(), 0);
}

#[tokio::test]
async fn test_malformed_multipart_hides_parser_detail() {
    let t = setup(1024 * 1024);

    let response = t
        .app
        .clone()
        .oneshot(upload_request(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio_file\"")
                .into_bytes(),
            false,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Malformed upload request.");
    assert_eq!(staged_files(t.staging.path()).await, 0);
}

#[tokio::test]
async fn test_dot_names_keep_their_extension() {
    let t = setup(1024 * 1024);
    let pattern = Regex::new(r"^\d{8}_\d{6}_[0-9a-f]{8}_\.(mp3|wav)$").unwrap();

    for name in [".mp3", "..mp3", "x/.wav"] {
        let response = t
            .app
            .clone()
            .oneshot(upload_request(
                multipart_body("audio_file", name, b"dotted"),
                true,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK, "{}", name);
        let body = json_body(response).await;
        let key = body["filename"].as_str().unwrap();
        assert!(pattern.is_match(key), "{} became {}", name, key);
    }

    assert!(t.service.transfers().drain(Duration::from_secs(5)).await);
    assert_eq!(t.storage.len(), 3);
    assert_eq!(staged_files(t.staging.path()).await, 0);
}

#[tokio::test]
async fn test_concurrent_uploads_do_not_collide() {
    let t = setup(1024 * 1024);

    let first = t.app.clone().oneshot(upload_request(
        multipart_body("audio_file", "clip.mp3", b"first upload"),
        true,
    ));
    let second = t.app.clone().oneshot(upload_request(
        multipart_body("audio_file", "clip.mp3", b"second upload"),
        true,
    ));
    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);

    let first_key = json_body(first).await["filename"]
        .as_str()
        .unwrap()
        .to_string();
    let second_key = json_body(second).await["filename"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(first_key, second_key);

    wait_for_empty_staging(t.staging.path()).await;
    assert!(t.service.transfers().drain(Duration::from_secs(5)).await);

    assert_eq!(
        t.storage.get(&format!("audio-uploads/{}", first_key)).unwrap(),
        b"first upload"
    );
    assert_eq!(
        t.storage.get(&format!("audio-uploads/{}", second_key)).unwrap(),
        b"second upload"
    );
}

#[tokio::test]
async fn test_health_check() {
    let t = setup(1024);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({ "status": "healthy" })
    );
}

#[tokio::test]
async fn test_upload_page_and_request_id() {
    let t = setup(1024);

    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("audio_file"));

    // Generated when the client does not send one
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
