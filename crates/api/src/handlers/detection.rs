//! Handlers for the `/detect` resource.
//!
//! A detection request uploads one video, runs it through the pipeline and
//! streams back a zip of annotated frames. The summary travels in response
//! headers so the body can stay a plain archive.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::http::StatusCode;
use axum::response::Response;
use deepscan_core::score::format_score;
use deepscan_core::workspace::{archive_stem, is_supported_video, SUPPORTED_VIDEO_EXTENSIONS};
use deepscan_pipeline::{CompletedJob, JobRequest, MAX_FRAME_BUDGET};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const HEADER_JOB_ID: &str = "x-job-id";
pub const HEADER_FRAMES_REQUESTED: &str = "x-frames-requested";
pub const HEADER_FRAMES_ANALYZED: &str = "x-frames-analyzed";
pub const HEADER_SCORES_AGGREGATED: &str = "x-scores-aggregated";
pub const HEADER_AVERAGE_SCORE: &str = "x-average-score";

/// Response headers carrying the job summary.
pub const SUMMARY_HEADERS: &[&str] = &[
    HEADER_JOB_ID,
    HEADER_FRAMES_REQUESTED,
    HEADER_FRAMES_ANALYZED,
    HEADER_SCORES_AGGREGATED,
    HEADER_AVERAGE_SCORE,
];

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    /// Frame budget; defaults to the configured budget when absent.
    pub frames: Option<i64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/detect/deepfake/video?frames=N
///
/// Accepts a multipart form with a required `file` field holding the video.
/// Responds with `application/zip` on success and a JSON error envelope
/// otherwise.
pub async fn detect_video(
    State(state): State<AppState>,
    params: Result<Query<DetectParams>, QueryRejection>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let frame_budget =
        resolve_frame_budget(params.frames, state.pipeline_config.default_frame_budget)?;

    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        if name != "file" {
            continue; // ignore unknown fields
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("The 'file' field has no file name".into()))?;
        validate_file_name(&file_name)?;

        let data = field.bytes().await?;
        upload = Some((file_name, data.to_vec()));
    }

    let (file_name, data) =
        upload.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }

    let request = JobRequest {
        file_name,
        data,
        frame_budget,
    };

    // Detached: if the client goes away mid-run the job still finishes and
    // its workspace still reaches the cleanup scheduler.
    let pipeline = Arc::clone(&state.pipeline);
    let done = tokio::spawn(async move { pipeline.run(request).await })
        .await
        .map_err(|e| AppError::InternalError(format!("Pipeline task failed: {e}")))??;

    archive_response(done).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate the requested frame budget, falling back to `default`.
pub fn resolve_frame_budget(requested: Option<i64>, default: usize) -> AppResult<usize> {
    match requested {
        None => Ok(default),
        Some(n) if n >= 1 && n <= MAX_FRAME_BUDGET as i64 => Ok(n as usize),
        Some(n) => Err(AppError::BadRequest(format!(
            "frames must be between 1 and {MAX_FRAME_BUDGET}, got {n}"
        ))),
    }
}

fn validate_file_name(file_name: &str) -> AppResult<()> {
    if is_supported_video(file_name) {
        return Ok(());
    }

    let supported = SUPPORTED_VIDEO_EXTENSIONS
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(AppError::BadRequest(format!(
        "Unsupported video file '{file_name}'. Supported: {supported}"
    )))
}

/// Stream the archive from disk. The delivery guard rides along with the
/// body stream, so the workspace outlives the transfer.
async fn archive_response(done: CompletedJob) -> AppResult<Response> {
    let file = tokio::fs::File::open(&done.archive_path)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    let summary = done.summary;
    let guard = done.guard;
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _held = &guard;
        chunk
    });

    tracing::debug!(
        job_id = %summary.job_id,
        bytes = size,
        cleanup_delay_secs = done.cleanup_delay.as_secs(),
        "Streaming archive",
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", archive_stem(summary.job_id)),
        )
        .header(HEADER_JOB_ID, summary.job_id.to_string())
        .header(HEADER_FRAMES_REQUESTED, summary.frames_requested.to_string())
        .header(HEADER_FRAMES_ANALYZED, summary.frames_analyzed.to_string())
        .header(HEADER_SCORES_AGGREGATED, summary.scores_aggregated.to_string())
        .header(HEADER_AVERAGE_SCORE, format_score(summary.average_score))
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn budget_defaults_when_absent() {
        assert_eq!(resolve_frame_budget(None, 50).unwrap(), 50);
    }

    #[test]
    fn budget_accepts_bounds() {
        assert_eq!(resolve_frame_budget(Some(1), 50).unwrap(), 1);
        assert_eq!(resolve_frame_budget(Some(500), 50).unwrap(), 500);
    }

    #[test]
    fn budget_rejects_out_of_range() {
        assert_matches!(resolve_frame_budget(Some(0), 50), Err(AppError::BadRequest(_)));
        assert_matches!(resolve_frame_budget(Some(-3), 50), Err(AppError::BadRequest(_)));
        assert_matches!(resolve_frame_budget(Some(501), 50), Err(AppError::BadRequest(_)));
    }

    #[test]
    fn file_name_validation() {
        assert!(validate_file_name("clip.MP4").is_ok());
        assert!(validate_file_name("clip.mkv").is_ok());
        assert_matches!(validate_file_name("notes.txt"), Err(AppError::BadRequest(msg)) if msg.contains(".webm"));
        assert_matches!(validate_file_name("noext"), Err(AppError::BadRequest(_)));
    }
}
