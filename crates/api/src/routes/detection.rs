//! Route definitions for manipulation detection.
//!
//! Mounted at `/detect`.
//!
//! ```text
//! POST /deepfake/video?frames=N                     detect_video
//! ```

use axum::routing::post;
use axum::Router;

use crate::handlers::detection;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/deepfake/video", post(detection::detect_video))
}
