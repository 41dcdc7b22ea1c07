use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use deepscan_core::error::PipelineError;
use deepscan_pipeline::JobFailure;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`JobFailure`] for pipeline errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A job that failed inside the pipeline.
    #[error(transparent)]
    Pipeline(#[from] JobFailure),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The upload exceeded the configured body limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(err.body_text())
        } else {
            AppError::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- Pipeline failures ---
            AppError::Pipeline(failure) => return failure_response(failure),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// JSON envelope for a failed job: `{error, code, stage, job_id, errors?}`.
fn failure_response(failure: &JobFailure) -> Response {
    let status = pipeline_status(&failure.error);
    if status.is_server_error() {
        tracing::error!(
            job_id = %failure.job_id,
            stage = %failure.stage,
            error = %failure.error,
            "Pipeline error",
        );
    }

    // Full paths only go to the logs.
    let mut body = json!({
        "error": failure.public_message(),
        "code": failure.error.code(),
        "stage": failure.stage,
        "job_id": failure.job_id,
    });
    let frame_errors = failure.public_frame_errors();
    if !frame_errors.is_empty() {
        body["errors"] = json!(frame_errors);
    }

    (status, axum::Json(body)).into_response()
}

/// HTTP status for a pipeline error. Extraction failures are blamed on the
/// upload; everything else is a server-side failure.
pub fn pipeline_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Extraction { .. } => StatusCode::BAD_REQUEST,
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Storage(_)
        | PipelineError::Detection(_)
        | PipelineError::Annotation(_)
        | PipelineError::Packaging(_)
        | PipelineError::ArchiveCreation(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
