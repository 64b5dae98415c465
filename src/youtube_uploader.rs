use bytes::{Bytes, BytesMut};
use chrono::Local;
use log::{error, info, warn};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::credentials::CredentialProvider;
use crate::upload_request::{PrivacyStatus, UploadRequest};

pub const UPLOAD_ENDPOINT: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

const BOUNDARY: &str = "recording_uploader_5c1f7e2a9b04d863";
const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("video file not found: {0}")]
    MissingFile(PathBuf),
    #[error("the API rejected the access token")]
    Unauthorized,
    #[error("upload failed with status {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload response did not contain a video id")]
    MissingId,
    #[error("credentials unavailable: {0:#}")]
    Credentials(anyhow::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct VideoResponse {
    id: Option<String>,
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

pub struct YouTubeUploader {
    http: Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: String,
    privacy: PrivacyStatus,
}

impl YouTubeUploader {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            http: Client::new(),
            credentials,
            endpoint: UPLOAD_ENDPOINT.to_string(),
            privacy: PrivacyStatus::Private,
        }
    }

    pub fn with_privacy(mut self, privacy: PrivacyStatus) -> Self {
        self.privacy = privacy;
        self
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Uploads the finished recording at `path` titled with today's date.
    /// Returns the new video id.
    pub async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let mut request =
            UploadRequest::for_recording(path.to_path_buf(), Local::now().date_naive());
        request.privacy = self.privacy;
        self.upload_request(&request).await
    }

    /// A 401 causes the credentials to be discarded and the request to be
    /// sent once more with a newly acquired token.
    pub async fn upload_request(&self, request: &UploadRequest) -> Result<String, UploadError> {
        if !tokio::fs::try_exists(&request.path).await? {
            return Err(UploadError::MissingFile(request.path.clone()));
        }

        info!("Uploading video: {}", request.path.display());
        info!("Title: {}", request.title);

        let video_id = match self.send(request).await {
            Err(UploadError::Unauthorized) => {
                warn!("Access token rejected, re-authorizing");
                self.credentials
                    .invalidate()
                    .await
                    .map_err(UploadError::Credentials)?;
                self.send(request).await?
            }
            other => other?,
        };

        info!("Video uploaded successfully! Video ID: {}", video_id);
        info!("Watch at: {}", watch_url(&video_id));
        Ok(video_id)
    }

    async fn send(&self, request: &UploadRequest) -> Result<String, UploadError> {
        let token = self
            .credentials
            .access_token()
            .await
            .map_err(UploadError::Credentials)?;

        let file = match File::open(&request.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UploadError::MissingFile(request.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata().await?.len();

        let metadata = serde_json::to_string(&request.metadata())?;
        let head = format!(
            "--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
             --{BOUNDARY}\r\nContent-Type: video/*\r\n\r\n"
        );
        let tail = format!("\r\n--{BOUNDARY}--\r\n");
        let content_length = head.len() as u64 + file_len + tail.len() as u64;

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("uploadType", "multipart"), ("part", "snippet,status")])
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={BOUNDARY}"))
            .header(CONTENT_LENGTH, content_length)
            .body(Body::wrap_stream(multipart_body(head, file, tail)))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(UploadError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Api { status, body });
        }

        let video: VideoResponse = response.json().await?;
        video.id.ok_or(UploadError::MissingId)
    }

    /// Uploads finished recordings one at a time until the channel closes.
    /// Failures are logged and the recording is left where it is.
    pub async fn run(self, mut ready: mpsc::Receiver<PathBuf>) {
        while let Some(path) = ready.recv().await {
            info!("Starting upload of {}", path.display());
            match self.upload(&path).await {
                Ok(video_id) => info!("Successfully uploaded video: {}", video_id),
                Err(e) => error!("Failed to upload {}: {}", path.display(), e),
            }
        }
    }
}

/// Metadata part, then the file streamed in chunks, then the closing boundary.
fn multipart_body(
    head: String,
    mut file: File,
    tail: String,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        yield Bytes::from(head);
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        loop {
            buf.reserve(CHUNK_SIZE);
            if file.read_buf(&mut buf).await? == 0 {
                break;
            }
            yield buf.split().freeze();
        }
        yield Bytes::from(tail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::dev::ServerHandle;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Received {
        auth: Vec<String>,
        content_types: Vec<String>,
        queries: Vec<String>,
        bodies: Vec<web::Bytes>,
    }

    async fn accept_upload(
        req: HttpRequest,
        body: web::Bytes,
        seen: web::Data<Mutex<Received>>,
    ) -> HttpResponse {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let auth = header("authorization");
        let mut seen = seen.lock().unwrap();
        seen.auth.push(auth.clone());
        seen.content_types.push(header("content-type"));
        seen.queries.push(req.query_string().to_string());
        seen.bodies.push(body);

        if auth == "Bearer good" {
            HttpResponse::Ok().json(serde_json::json!({ "id": "vid123", "kind": "youtube#video" }))
        } else {
            HttpResponse::Unauthorized().finish()
        }
    }

    async fn broken_upload(seen: web::Data<Mutex<Received>>) -> HttpResponse {
        seen.lock().unwrap().auth.push("broken".into());
        HttpResponse::InternalServerError().body("backend error")
    }

    async fn start_fake_api() -> (String, web::Data<Mutex<Received>>, ServerHandle) {
        let seen = web::Data::new(Mutex::new(Received::default()));
        let app_seen = seen.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_seen.clone())
                .route("/upload", web::post().to(accept_upload))
                .route("/broken", web::post().to(broken_upload))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let running = server.run();
        let handle = running.handle();
        tokio::spawn(running);
        (format!("http://{}", addr), seen, handle)
    }

    /// Hands out `current` until invalidated, then `next`.
    struct FakeCredentials {
        current: Mutex<String>,
        next: String,
        invalidations: AtomicUsize,
    }

    impl FakeCredentials {
        fn new(current: &str, next: &str) -> Arc<Self> {
            Arc::new(Self {
                current: Mutex::new(current.to_string()),
                next: next.to_string(),
                invalidations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialProvider for FakeCredentials {
        async fn access_token(&self) -> anyhow::Result<String> {
            Ok(self.current.lock().unwrap().clone())
        }

        async fn invalidate(&self) -> anyhow::Result<()> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            *self.current.lock().unwrap() = self.next.clone();
            Ok(())
        }
    }

    fn recording(dir: &Path) -> UploadRequest {
        let path = dir.join("recording.mkv");
        std::fs::write(&path, b"video-bytes").unwrap();
        UploadRequest::for_recording(path, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[tokio::test]
    async fn uploads_metadata_and_file_in_one_request() {
        let (base, seen, handle) = start_fake_api().await;
        let tmp = tempfile::tempdir().unwrap();
        let credentials = FakeCredentials::new("good", "unused");
        let uploader =
            YouTubeUploader::new(credentials.clone()).with_endpoint(&format!("{}/upload", base));

        let id = uploader.upload_request(&recording(tmp.path())).await.unwrap();
        assert_eq!(id, "vid123");

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.auth, vec!["Bearer good".to_string()]);
            assert!(seen.content_types[0].starts_with("multipart/related; boundary="));
            assert!(seen.queries[0].contains("uploadType=multipart"));

            let body = String::from_utf8_lossy(&seen.bodies[0]);
            assert!(body.contains("\"title\":\"06/01/2024\""));
            assert!(body.contains("\"privacyStatus\":\"private\""));
            assert!(body.contains("Content-Type: video/*\r\n\r\nvideo-bytes\r\n"));
            assert!(body.ends_with(&format!("--{}--\r\n", BOUNDARY)));
        }
        assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 0);
        handle.stop(false).await;
    }

    #[tokio::test]
    async fn rejected_token_is_replaced_once() {
        let (base, seen, handle) = start_fake_api().await;
        let tmp = tempfile::tempdir().unwrap();
        let credentials = FakeCredentials::new("stale", "good");
        let uploader =
            YouTubeUploader::new(credentials.clone()).with_endpoint(&format!("{}/upload", base));

        let id = uploader.upload_request(&recording(tmp.path())).await.unwrap();
        assert_eq!(id, "vid123");
        assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(
            seen.lock().unwrap().auth,
            vec!["Bearer stale".to_string(), "Bearer good".to_string()]
        );
        handle.stop(false).await;
    }

    #[tokio::test]
    async fn repeated_rejection_is_surfaced() {
        let (base, seen, handle) = start_fake_api().await;
        let tmp = tempfile::tempdir().unwrap();
        let credentials = FakeCredentials::new("stale", "still-stale");
        let uploader =
            YouTubeUploader::new(credentials.clone()).with_endpoint(&format!("{}/upload", base));

        let err = uploader
            .upload_request(&recording(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Unauthorized));
        assert_eq!(credentials.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().auth.len(), 2);
        handle.stop(false).await;
    }

    #[tokio::test]
    async fn server_errors_are_not_retried() {
        let (base, seen, handle) = start_fake_api().await;
        let tmp = tempfile::tempdir().unwrap();
        let uploader = YouTubeUploader::new(FakeCredentials::new("good", "unused"))
            .with_endpoint(&format!("{}/broken", base));

        let err = uploader
            .upload_request(&recording(tmp.path()))
            .await
            .unwrap_err();
        match err {
            UploadError::Api { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "backend error");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(seen.lock().unwrap().auth.len(), 1);
        handle.stop(false).await;
    }

    #[tokio::test]
    async fn missing_file_is_reported_without_a_request() {
        let (base, seen, handle) = start_fake_api().await;
        let tmp = tempfile::tempdir().unwrap();
        let uploader = YouTubeUploader::new(FakeCredentials::new("good", "unused"))
            .with_endpoint(&format!("{}/upload", base));

        let err = uploader
            .upload(&tmp.path().join("gone.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingFile(_)));
        assert!(seen.lock().unwrap().auth.is_empty());
        handle.stop(false).await;
    }

    #[test]
    fn watch_url_points_at_the_video() {
        assert_eq!(watch_url("abc"), "https://www.youtube.com/watch?v=abc");
    }
}
