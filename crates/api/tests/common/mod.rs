#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use deepscan_core::annotate::ImageAnnotator;
use deepscan_core::detect::DeepfakeDetector;
use deepscan_core::error::PipelineError;
use deepscan_core::extract::{frame_id, FrameError, FrameExtractor, FrameRef, PreprocessResult};
use deepscan_core::score::ScoreMap;
use deepscan_core::types::JobId;
use deepscan_core::workspace::FRAMES_DIR;
use deepscan_pipeline::{CleanupScheduler, Pipeline, DEFAULT_JOB_TIMEOUT};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use deepscan_api::config::{PipelineConfig, ServerConfig};
use deepscan_api::router::build_app_router;
use deepscan_api::state::AppState;

pub const BOUNDARY: &str = "deepscan-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

// ---------------------------------------------------------------------------
// Stub capabilities
// ---------------------------------------------------------------------------

/// Writes `frames` small JPEGs and reports `errors` alongside them.
pub struct StubExtractor {
    pub frames: usize,
    pub errors: Vec<FrameError>,
}

impl StubExtractor {
    pub fn frames(frames: usize) -> Self {
        Self {
            frames,
            errors: Vec::new(),
        }
    }
}

#[async_trait]
impl FrameExtractor for StubExtractor {
    async fn extract(
        &self,
        _video_path: &Path,
        output_dir: &Path,
        job_id: JobId,
        frame_budget: usize,
    ) -> Result<PreprocessResult, PipelineError> {
        let dir = output_dir.join(FRAMES_DIR);
        std::fs::create_dir_all(&dir).unwrap();

        let frames = (0..self.frames.min(frame_budget))
            .map(|index| {
                let id = frame_id(index);
                let path = dir.join(format!("{id}.jpg"));
                RgbImage::from_pixel(32, 24, Rgb([200, 180, 20]))
                    .save_with_format(&path, ImageFormat::Jpeg)
                    .unwrap();
                FrameRef {
                    id,
                    index,
                    path,
                    timestamp_secs: index as f64 * 0.5,
                }
            })
            .collect();

        Ok(PreprocessResult {
            video_id: job_id,
            frames,
            errors: self.errors.clone(),
        })
    }
}

/// Returns a fixed ScoreMap after `delay`, or a detection error when
/// `scores` is `None`.
pub struct StubDetector {
    pub scores: Option<serde_json::Value>,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StubDetector {
    pub fn returning(scores: serde_json::Value) -> Self {
        Self {
            scores: Some(scores),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            scores: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails with a detection error, but only after `delay`.
    pub fn failing_after(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::failing()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeepfakeDetector for StubDetector {
    async fn detect(&self, _workspace: &Path) -> Result<ScoreMap, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.scores {
            Some(scores) => Ok(serde_json::from_value(scores.clone()).unwrap()),
            None => Err(PipelineError::Detection("model weights missing".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Test app
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub cleanup: CleanupScheduler,
    pub detector: Arc<StubDetector>,
    pub temp: TempDir,
}

impl TestApp {
    pub fn temp_root(&self) -> PathBuf {
        self.temp.path().to_path_buf()
    }

    pub fn workspace(&self, job_id: &str) -> PathBuf {
        self.temp.path().join(job_id)
    }

    /// Number of job workspaces currently on disk.
    pub fn workspace_count(&self) -> usize {
        std::fs::read_dir(self.temp.path()).unwrap().count()
    }
}

/// Build the full application router with all middleware layers, backed by
/// stub capabilities and a cleanup scheduler using `cleanup_delay`.
pub fn build_test_app(
    extractor: StubExtractor,
    detector: StubDetector,
    cleanup_delay: Duration,
) -> TestApp {
    build_test_app_with_timeouts(extractor, detector, cleanup_delay, DEFAULT_JOB_TIMEOUT, 30)
}

/// [`build_test_app`] with an explicit job deadline and configured request
/// timeout.
pub fn build_test_app_with_timeouts(
    extractor: StubExtractor,
    detector: StubDetector,
    cleanup_delay: Duration,
    job_timeout: Duration,
    request_timeout_secs: u64,
) -> TestApp {
    let temp = tempfile::tempdir().unwrap();
    let detector = Arc::new(detector);
    let cleanup = CleanupScheduler::start(cleanup_delay);

    let pipeline = Pipeline::new(
        temp.path().to_path_buf(),
        Arc::new(extractor),
        detector.clone(),
        Arc::new(ImageAnnotator),
        cleanup.clone(),
    )
    .with_job_timeout(job_timeout);

    let config = ServerConfig {
        request_timeout_secs,
        ..test_config()
    };
    let pipeline_config = PipelineConfig {
        temp_dir: temp.path().to_path_buf(),
        cleanup_delay,
        job_timeout,
        max_upload_bytes: 1024 * 1024,
        ..PipelineConfig::default()
    };

    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline_config: Arc::new(pipeline_config),
        pipeline: Arc::new(pipeline),
    };

    TestApp {
        router: build_app_router(state, &config),
        cleanup,
        detector,
        temp,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Multipart body with a single `file` part.
pub fn multipart_body(file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Multipart body with a single text field that is not `file`.
pub fn multipart_text_only(name: &str, value: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n--{BOUNDARY}--\r\n"
    )
    .into_bytes()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a video upload to the detection endpoint.
pub async fn upload(app: Router, query: &str, file_name: &str, data: &[u8]) -> Response<Body> {
    let uri = format!("/api/v1/detect/deepfake/video{query}");
    post_multipart(app, &uri, multipart_body(file_name, data)).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

pub async fn wait_until_gone(path: &Path, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    !path.exists()
}
