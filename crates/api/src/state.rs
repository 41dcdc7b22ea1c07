use std::sync::Arc;

use deepscan_pipeline::Pipeline;

use crate::config::{PipelineConfig, ServerConfig};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (bind address, CORS, timeouts).
    pub config: Arc<ServerConfig>,
    /// Pipeline configuration (temp root, upload limit, default frame budget).
    pub pipeline_config: Arc<PipelineConfig>,
    /// Job runner with its capabilities and cleanup scheduler.
    pub pipeline: Arc<Pipeline>,
}
