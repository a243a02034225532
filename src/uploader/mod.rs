//! Uploader - Remote Artifact Transfer
//!
//! ## Responsibilities
//!
//! - Upload one queued image to the remote API (multipart POST)
//! - Retry transient failures with a fixed delay
//! - Connectivity probe used by the sync engine

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Per-request timeout for uploads
const UPLOAD_TIMEOUT_SEC: u64 = 30;

/// Connectivity probe timeout
const PROBE_TIMEOUT_SEC: u64 = 5;

/// Remote upload collaborator
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload the file at `path`, returning its remote location
    async fn upload(&self, path: &Path) -> Result<String>;
}

/// Connectivity collaborator
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// True when the remote side is reachable. Never errors.
    async fn is_online(&self) -> bool;
}

/// Upload response from the remote API
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// HTTP multipart uploader
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpUploader {
    /// Create new HttpUploader. A `None` endpoint makes every upload fail.
    pub fn new(endpoint: Option<String>, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_TIMEOUT_SEC))
            .build()?;

        if endpoint.is_none() {
            tracing::warn!("S3_API_URL not set, uploads will stay pending");
        }

        Ok(Self {
            client,
            endpoint,
            max_retries: max_retries.max(1),
            retry_delay,
        })
    }

    async fn send_once(&self, endpoint: &str, filename: &str, data: Vec<u8>) -> Result<String> {
        // Form is consumed by send, so it is rebuilt per attempt
        let form = Form::new().part(
            "file",
            Part::bytes(data)
                .file_name(filename.to_string())
                .mime_str(mime_for(filename))?,
        );

        let resp = self.client.post(endpoint).multipart(form).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("{} - {}", status, body.trim())));
        }

        // Body without a location still counts as success
        let body = resp.text().await.unwrap_or_default();
        let location = serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(|r| r.location.or(r.url))
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), filename));

        Ok(location)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Upload("S3_API_URL not configured".to_string()))?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation(format!("Invalid path: {}", path.display())))?;

        let data = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("Image {}", filename)),
            _ => Error::Io(e),
        })?;

        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.send_once(endpoint, &filename, data.clone()).await {
                Ok(location) => {
                    tracing::debug!(
                        filename = %filename,
                        attempt = attempt,
                        location = %location,
                        "Upload accepted"
                    );
                    return Ok(location);
                }
                Err(e) => {
                    tracing::warn!(
                        filename = %filename,
                        attempt = attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Upload attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Upload("Upload failed after retries".to_string())))
    }
}

fn mime_for(filename: &str) -> &'static str {
    if filename.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}

/// HTTP GET reachability probe
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SEC))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Multipart, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn image(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"jpeg").unwrap();
        path
    }

    #[tokio::test]
    async fn test_upload_returns_location() {
        let app = Router::new().route(
            "/upload",
            post(|mut multipart: Multipart| async move {
                let field = multipart.next_field().await.unwrap().unwrap();
                let name = field.file_name().unwrap().to_string();
                Json(serde_json::json!({ "location": format!("s3://bucket/{}", name) }))
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let path = image(dir.path(), "camera_1_a.jpg");

        let uploader =
            HttpUploader::new(Some(format!("{}/upload", base)), 1, Duration::ZERO).unwrap();
        let location = uploader.upload(&path).await.unwrap();
        assert_eq!(location, "s3://bucket/camera_1_a.jpg");
    }

    #[tokio::test]
    async fn test_upload_retries_then_fails() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/upload",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }
            }),
        );
        let base = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let path = image(dir.path(), "camera_1_b.jpg");

        let uploader =
            HttpUploader::new(Some(format!("{}/upload", base)), 3, Duration::from_millis(5))
                .unwrap();
        let result = uploader.upload(&path).await;
        assert!(matches!(result, Err(Error::Upload(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_upload_without_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = image(dir.path(), "camera_2_c.jpg");
        let uploader = HttpUploader::new(None, 3, Duration::ZERO).unwrap();
        assert!(matches!(uploader.upload(&path).await, Err(Error::Upload(_))));
    }

    #[tokio::test]
    async fn test_probe() {
        let app = Router::new().route("/", axum::routing::get(|| async { "ok" }));
        let base = serve(app).await;

        assert!(HttpProbe::new(base).unwrap().is_online().await);
        assert!(!HttpProbe::new("http://127.0.0.1:1").unwrap().is_online().await);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("a.PNG"), "image/png");
        assert_eq!(mime_for("a.jpg"), "image/jpeg");
    }
}
