use std::path::PathBuf;
use std::time::Duration;

use deepscan_core::detect::DEFAULT_DETECTOR_TIMEOUT;
use deepscan_core::ffmpeg::DEFAULT_TOOL_TIMEOUT;
use deepscan_pipeline::cleanup::{clamp_delay, CLEANUP_DELAY};
use deepscan_pipeline::job::{DEFAULT_FRAME_BUDGET, MAX_FRAME_BUDGET};
use deepscan_pipeline::DEFAULT_JOB_TIMEOUT;

/// Time left after a job deadline for the failure response to go out.
pub const RESPONSE_MARGIN: Duration = Duration::from_secs(30);

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `930`). See
    /// [`ServerConfig::request_timeout`] for the value actually applied.
    pub request_timeout_secs: u64,
    /// Upper bound on post-shutdown cleanup in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `930`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "930".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }

    /// Request timeout applied by the HTTP layer.
    ///
    /// Never shorter than the job deadline plus [`RESPONSE_MARGIN`]: a job
    /// that runs out of time must still be able to report which stage it
    /// was in.
    pub fn request_timeout(&self, pipeline: &PipelineConfig) -> Duration {
        Duration::from_secs(self.request_timeout_secs).max(pipeline.job_timeout + RESPONSE_MARGIN)
    }
}

/// Default upload limit: 500 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which per-job workspaces are created.
    pub temp_dir: PathBuf,
    /// Detector command line; the workspace path is appended on each run.
    pub detector_command: Option<String>,
    pub detector_timeout: Duration,
    /// Limit for each ffprobe/ffmpeg invocation.
    pub ffmpeg_timeout: Duration,
    /// Deadline for a whole job, from upload to archive.
    pub job_timeout: Duration,
    /// Grace period before a delivered job's workspace is removed. Never
    /// below [`CLEANUP_DELAY`].
    pub cleanup_delay: Duration,
    pub max_upload_bytes: usize,
    /// Frame budget used when the request does not carry one.
    pub default_frame_budget: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                           |
    /// |-------------------------|-----------------------------------|
    /// | `DEEPSCAN_TEMP_DIR`     | `{system temp}/deepscan`          |
    /// | `DETECTOR_COMMAND`      | unset                             |
    /// | `DETECTOR_TIMEOUT_SECS` | `600`                             |
    /// | `FFMPEG_TIMEOUT_SECS`   | `60`                              |
    /// | `JOB_TIMEOUT_SECS`      | `900`                             |
    /// | `CLEANUP_DELAY_SECS`    | `60` (values below 60 are raised) |
    /// | `MAX_UPLOAD_BYTES`      | `524288000` (500 MiB)             |
    /// | `DEFAULT_FRAME_BUDGET`  | `50` (clamped to 1..=500)         |
    pub fn from_env() -> Self {
        let temp_dir = std::env::var("DEEPSCAN_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("deepscan"));

        let detector_command = std::env::var("DETECTOR_COMMAND")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let detector_timeout =
            secs_from_env("DETECTOR_TIMEOUT_SECS").unwrap_or(DEFAULT_DETECTOR_TIMEOUT);

        let ffmpeg_timeout = secs_from_env("FFMPEG_TIMEOUT_SECS").unwrap_or(DEFAULT_TOOL_TIMEOUT);
        let job_timeout = secs_from_env("JOB_TIMEOUT_SECS").unwrap_or(DEFAULT_JOB_TIMEOUT);

        let cleanup_delay = secs_from_env("CLEANUP_DELAY_SECS").unwrap_or(CLEANUP_DELAY);

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_UPLOAD_BYTES.to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let default_frame_budget: usize = std::env::var("DEFAULT_FRAME_BUDGET")
            .unwrap_or_else(|_| DEFAULT_FRAME_BUDGET.to_string())
            .parse()
            .expect("DEFAULT_FRAME_BUDGET must be a valid usize");

        Self {
            temp_dir,
            detector_command,
            detector_timeout,
            ffmpeg_timeout,
            job_timeout,
            cleanup_delay: clamp_delay(cleanup_delay),
            max_upload_bytes,
            default_frame_budget: default_frame_budget.clamp(1, MAX_FRAME_BUDGET),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("deepscan"),
            detector_command: None,
            detector_timeout: DEFAULT_DETECTOR_TIMEOUT,
            ffmpeg_timeout: DEFAULT_TOOL_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            cleanup_delay: CLEANUP_DELAY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_frame_budget: DEFAULT_FRAME_BUDGET,
        }
    }
}

fn secs_from_env(key: &str) -> Option<Duration> {
    std::env::var(key).ok().map(|v| {
        let secs: u64 = v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid u64"));
        Duration::from_secs(secs)
    })
}
