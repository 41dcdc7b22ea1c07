use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use deepscan_core::annotate::ImageAnnotator;
use deepscan_core::detect::ScriptDetector;
use deepscan_core::extract::FfmpegFrameExtractor;
use deepscan_pipeline::{CleanupScheduler, Pipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepscan_api::config::{PipelineConfig, ServerConfig};
use deepscan_api::router::build_app_router;
use deepscan_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "deepscan_api=debug,deepscan_pipeline=debug,deepscan_core=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline_config = PipelineConfig::from_env();
    tracing::info!(
        temp_dir = %pipeline_config.temp_dir.display(),
        cleanup_delay_secs = pipeline_config.cleanup_delay.as_secs(),
        job_timeout_secs = pipeline_config.job_timeout.as_secs(),
        request_timeout_secs = config.request_timeout(&pipeline_config).as_secs(),
        max_upload_bytes = pipeline_config.max_upload_bytes,
        default_frame_budget = pipeline_config.default_frame_budget,
        "Loaded pipeline configuration"
    );

    tokio::fs::create_dir_all(&pipeline_config.temp_dir)
        .await
        .expect("Failed to create temp directory");

    // --- Capabilities ---
    let detector_command = pipeline_config
        .detector_command
        .as_deref()
        .expect("DETECTOR_COMMAND must be set");
    let detector =
        ScriptDetector::from_command_line(detector_command, pipeline_config.detector_timeout)
            .expect("DETECTOR_COMMAND must not be empty");
    tracing::info!(command = %detector_command, "Detector configured");
    if pipeline_config.detector_timeout >= pipeline_config.job_timeout {
        tracing::warn!(
            detector_timeout_secs = pipeline_config.detector_timeout.as_secs(),
            job_timeout_secs = pipeline_config.job_timeout.as_secs(),
            "Detector timeout exceeds the job deadline; slow runs will end as job timeouts",
        );
    }

    // --- Cleanup scheduler ---
    let cleanup = CleanupScheduler::start(pipeline_config.cleanup_delay);

    // --- App state ---
    let pipeline = Pipeline::new(
        pipeline_config.temp_dir.clone(),
        Arc::new(FfmpegFrameExtractor::new(pipeline_config.ffmpeg_timeout)),
        Arc::new(detector),
        Arc::new(ImageAnnotator),
        cleanup.clone(),
    )
    .with_job_timeout(pipeline_config.job_timeout);

    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline_config: Arc::new(pipeline_config),
        pipeline: Arc::new(pipeline),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Remove every workspace still waiting for its grace period.
    if tokio::time::timeout(
        Duration::from_secs(config.shutdown_timeout_secs),
        cleanup.shutdown(),
    )
    .await
    .is_err()
    {
        tracing::warn!("Cleanup scheduler did not finish in time");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
