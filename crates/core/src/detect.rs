//! Manipulation-detection capability.
//!
//! The shipped [`ScriptDetector`] runs an external program (typically a
//! Python model wrapper) that receives the workspace path as its last
//! argument and a JSON request on stdin, and prints a JSON object mapping
//! frame identifiers to scores on stdout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;

use crate::error::PipelineError;
use crate::score::ScoreMap;
use crate::subprocess;
use crate::workspace::frames_dir;

/// Default wall-clock limit for one detector run.
pub const DEFAULT_DETECTOR_TIMEOUT: Duration = Duration::from_secs(600);

/// Capability mapping a workspace of extracted frames to raw scores.
#[async_trait]
pub trait DeepfakeDetector: Send + Sync {
    /// Score every frame under `workspace`. An `Err` means inference as a
    /// whole failed; per-frame oddities belong in the returned map.
    async fn detect(&self, workspace: &Path) -> Result<ScoreMap, PipelineError>;
}

/// [`DeepfakeDetector`] backed by an external command.
#[derive(Debug, Clone)]
pub struct ScriptDetector {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptDetector {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a whitespace-separated command line, e.g.
    /// `python3 /opt/detector/run.py --device cpu`.
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command_line(command_line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }
}

#[async_trait]
impl DeepfakeDetector for ScriptDetector {
    async fn detect(&self, workspace: &Path) -> Result<ScoreMap, PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(workspace);

        let request = json!({
            "workspace": workspace,
            "frames_dir": frames_dir(workspace),
        });

        let output = subprocess::run_command(&mut cmd, &request, self.timeout)
            .await
            .map_err(|e| PipelineError::Detection(e.to_string()))?;

        tracing::debug!(
            program = %self.program.display(),
            duration_ms = output.duration_ms,
            "Detector finished",
        );
        if !output.stderr.trim().is_empty() {
            tracing::debug!(stderr = %output.stderr.trim(), "Detector diagnostics");
        }

        parse_scores(&output.stdout)
    }
}

/// Parse detector stdout into a [`ScoreMap`].
///
/// The output must be a JSON object; any value shape is accepted per key.
pub fn parse_scores(stdout: &str) -> Result<ScoreMap, PipelineError> {
    serde_json::from_str::<ScoreMap>(stdout.trim())
        .map_err(|e| PipelineError::Detection(format!("detector output is not a score object: {e}")))
}
