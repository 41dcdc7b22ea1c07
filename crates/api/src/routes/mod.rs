pub mod detection;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /detect/deepfake/video                           analyze an uploaded video (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/detect", detection::router())
}
