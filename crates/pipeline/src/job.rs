//! Job record and lifecycle state machine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use deepscan_core::error::{PipelineError, Stage};
use deepscan_core::extract::FrameError;
use deepscan_core::types::{new_job_id, JobId};
use deepscan_core::workspace::Workspace;
use serde::Serialize;

/// Frame budget used when the caller does not supply one.
pub const DEFAULT_FRAME_BUDGET: usize = 50;

/// Largest frame budget a caller may request.
pub const MAX_FRAME_BUDGET: usize = 500;

/// Lifecycle of a job. Transitions are strictly sequential; any
/// non-terminal state may move to [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Received,
    Saved,
    Extracted,
    Scored,
    Annotated,
    Packaged,
    Completed,
    Failed { stage: Stage, cause: String },
}

impl JobState {
    /// The state a successful stage moves to, or `None` from a terminal state.
    pub fn next(&self) -> Option<JobState> {
        match self {
            Self::Received => Some(Self::Saved),
            Self::Saved => Some(Self::Extracted),
            Self::Extracted => Some(Self::Scored),
            Self::Scored => Some(Self::Annotated),
            Self::Annotated => Some(Self::Packaged),
            Self::Packaged => Some(Self::Completed),
            Self::Completed | Self::Failed { .. } => None,
        }
    }

    /// The stage running while the job sits in this state.
    pub fn stage_in_progress(&self) -> Stage {
        match self {
            Self::Received => Stage::Save,
            Self::Saved => Stage::Extract,
            Self::Extracted => Stage::Score,
            Self::Scored => Stage::Annotate,
            Self::Annotated | Self::Packaged | Self::Completed => Stage::Package,
            Self::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Saved => "saved",
            Self::Extracted => "extracted",
            Self::Scored => "scored",
            Self::Annotated => "annotated",
            Self::Packaged => "packaged",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One request to analyze a single uploaded video.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub frame_budget: usize,
    pub created_at: DateTime<Utc>,
    pub workspace: Option<Workspace>,
    pub video_path: Option<PathBuf>,
    state: JobState,
}

impl Job {
    pub fn new(frame_budget: usize) -> Self {
        Self {
            id: new_job_id(),
            frame_budget,
            created_at: Utc::now(),
            workspace: None,
            video_path: None,
            state: JobState::Received,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Move to the next state in sequence. Skipping a stage is a bug.
    pub fn advance(&mut self, to: JobState) {
        debug_assert_eq!(
            self.state.next().as_ref(),
            Some(&to),
            "illegal transition {} -> {}",
            self.state.name(),
            to.name()
        );

        tracing::debug!(
            job_id = %self.id,
            from = self.state.name(),
            to = to.name(),
            elapsed_ms = self.elapsed_ms(),
            "Job state transition",
        );
        self.state = to;
    }

    /// Record a fatal error.
    pub fn fail(&mut self, error: &PipelineError) {
        debug_assert!(!self.state.is_terminal(), "job already terminal");

        self.state = JobState::Failed {
            stage: error.stage(),
            cause: error.to_string(),
        };
    }

    /// Milliseconds since the job was received.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}

/// Stands in for the temp root in client-facing messages.
const TEMP_ROOT_PLACEHOLDER: &str = "<temp_dir>";

/// A job that ended in [`JobState::Failed`].
#[derive(Debug, thiserror::Error)]
#[error("job {job_id} failed at {stage}: {error}")]
pub struct JobFailure {
    pub job_id: JobId,
    pub stage: Stage,
    #[source]
    pub error: PipelineError,
    /// Workspace location, stripped from [`JobFailure::public_message`].
    pub workspace: Option<PathBuf>,
}

impl JobFailure {
    pub fn new(job_id: JobId, error: PipelineError) -> Self {
        Self {
            job_id,
            stage: error.stage(),
            error,
            workspace: None,
        }
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    /// The error message with server filesystem locations removed. Paths
    /// inside the workspace become relative to it.
    pub fn public_message(&self) -> String {
        self.redact(&self.error.to_string())
    }

    /// Itemized extraction errors, redacted like [`JobFailure::public_message`].
    pub fn public_frame_errors(&self) -> Vec<FrameError> {
        match &self.error {
            PipelineError::Extraction { frame_errors, .. } => frame_errors
                .iter()
                .map(|e| FrameError {
                    index: e.index,
                    reason: self.redact(&e.reason),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn redact(&self, text: &str) -> String {
        let Some(workspace) = self.workspace.as_deref() else {
            return text.to_string();
        };

        let root = workspace.display().to_string();
        let mut out = text
            .replace(&format!("{root}{}", std::path::MAIN_SEPARATOR), "")
            .replace(&root, ".");

        if let Some(temp_root) = workspace.parent().filter(|p| is_redactable(p)) {
            out = out.replace(&temp_root.display().to_string(), TEMP_ROOT_PLACEHOLDER);
        }
        out
    }
}

/// Absolute and not the filesystem root.
fn is_redactable(path: &Path) -> bool {
    path.is_absolute() && path.parent().is_some()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let mut job = Job::new(50);
        let mut steps = 0;
        while let Some(next) = job.state().next() {
            job.advance(next);
            steps += 1;
        }
        assert_eq!(steps, 6);
        assert_eq!(job.state(), &JobState::Completed);
        assert!(job.state().is_terminal());
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    #[cfg(debug_assertions)]
    fn skipping_a_stage_panics_in_debug() {
        let mut job = Job::new(50);
        job.advance(JobState::Scored);
    }

    #[test]
    fn failure_records_stage_and_cause() {
        let mut job = Job::new(5);
        job.advance(JobState::Saved);
        job.fail(&PipelineError::Detection("model missing".into()));

        assert_matches!(
            job.state(),
            JobState::Failed { stage: Stage::Score, cause } if cause.contains("model missing")
        );
        assert_eq!(job.state().next(), None);
    }

    #[test]
    fn job_failure_carries_stage_of_error() {
        let failure = JobFailure::new(new_job_id(), PipelineError::Packaging("empty".into()));
        assert_eq!(failure.stage, Stage::Package);
        assert!(failure.to_string().contains("failed at package"));
    }

    #[test]
    fn stage_in_progress_follows_state() {
        let mut job = Job::new(5);
        assert_eq!(job.state().stage_in_progress(), Stage::Save);
        job.advance(JobState::Saved);
        job.advance(JobState::Extracted);
        assert_eq!(job.state().stage_in_progress(), Stage::Score);
    }

    #[cfg(unix)]
    #[test]
    fn public_message_strips_workspace_paths() {
        let id = new_job_id();
        let workspace = PathBuf::from(format!("/var/tmp/deepscan/{id}"));
        let failure = JobFailure::new(
            id,
            PipelineError::Packaging(format!(
                "annotated directory {}/annotated_results is empty",
                workspace.display()
            )),
        )
        .with_workspace(&workspace);

        let message = failure.public_message();
        assert_eq!(message, "Packaging failed: annotated directory annotated_results is empty");
        assert!(!message.contains("/var/tmp"));
        assert!(failure.to_string().contains("/var/tmp/deepscan"));
    }

    #[cfg(unix)]
    #[test]
    fn public_message_hides_temp_root() {
        let id = new_job_id();
        let failure = JobFailure::new(
            id,
            PipelineError::Storage("cannot create temp root /var/tmp/deepscan: denied".into()),
        )
        .with_workspace(format!("/var/tmp/deepscan/{id}"));

        assert_eq!(
            failure.public_message(),
            "Storage error: cannot create temp root <temp_dir>: denied"
        );
    }

    #[cfg(unix)]
    #[test]
    fn frame_errors_are_redacted_too() {
        let id = new_job_id();
        let failure = JobFailure::new(
            id,
            PipelineError::Extraction {
                message: "1 frame(s) failed".into(),
                frame_errors: vec![FrameError::at(
                    0,
                    format!("/srv/scratch/{id}/input.mp4: Invalid data found"),
                )],
            },
        )
        .with_workspace(format!("/srv/scratch/{id}"));

        let errors = failure.public_frame_errors();
        assert_eq!(errors, vec![FrameError::at(0, "input.mp4: Invalid data found")]);
    }

    #[test]
    fn without_workspace_message_is_unchanged() {
        let failure = JobFailure::new(new_job_id(), PipelineError::Detection("down".into()));
        assert_eq!(failure.public_message(), "Detection failed: down");
        assert!(failure.public_frame_errors().is_empty());
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(JobState::Failed {
            stage: Stage::Extract,
            cause: "no frames".into(),
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "extract");
    }
}
