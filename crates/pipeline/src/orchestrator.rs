//! Pipeline orchestrator: save, extract, score, annotate, package, then
//! hand the workspace to the cleanup scheduler.
//!
//! Each stage only starts once its predecessor's postconditions hold. Any
//! stage error aborts the job; the workspace is then discarded straight
//! away since nothing from it will be served. A job that outlives its
//! deadline is cancelled the same way, which also kills any tool still
//! running for it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deepscan_core::annotate::FrameAnnotator;
use deepscan_core::detect::DeepfakeDetector;
use deepscan_core::error::PipelineError;
use deepscan_core::extract::FrameExtractor;
use deepscan_core::package;
use deepscan_core::score::{self, Summary};
use deepscan_core::types::JobId;
use deepscan_core::workspace::Workspace;

use crate::cleanup::{CleanupScheduler, DeliveryGuard};
use crate::job::{Job, JobFailure, JobState};

/// Default deadline for a whole job, from upload to archive.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(900);

/// Input for one job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// Client-supplied file name; only its extension is kept.
    pub file_name: String,
    pub data: Vec<u8>,
    pub frame_budget: usize,
}

/// Outcome of a successful job.
///
/// `guard` must live as long as anything reads `archive_path`.
#[derive(Debug)]
pub struct CompletedJob {
    pub job_id: JobId,
    pub summary: Summary,
    pub archive_path: PathBuf,
    pub cleanup_delay: Duration,
    pub guard: DeliveryGuard,
}

/// Runs jobs against a fixed set of capabilities.
pub struct Pipeline {
    temp_root: PathBuf,
    extractor: Arc<dyn FrameExtractor>,
    detector: Arc<dyn DeepfakeDetector>,
    annotator: Arc<dyn FrameAnnotator>,
    cleanup: CleanupScheduler,
    job_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        temp_root: PathBuf,
        extractor: Arc<dyn FrameExtractor>,
        detector: Arc<dyn DeepfakeDetector>,
        annotator: Arc<dyn FrameAnnotator>,
        cleanup: CleanupScheduler,
    ) -> Self {
        Self {
            temp_root,
            extractor,
            detector,
            annotator,
            cleanup,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Replace the default per-job deadline.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    /// Run one job to completion.
    ///
    /// On success the archive exists and its workspace is scheduled for
    /// deferred removal exactly once. On failure, including a missed
    /// deadline, the workspace, if one was allocated, is discarded
    /// immediately.
    pub async fn run(&self, request: JobRequest) -> Result<CompletedJob, JobFailure> {
        let mut job = Job::new(request.frame_budget);

        tracing::info!(
            job_id = %job.id,
            file_name = %request.file_name,
            bytes = request.data.len(),
            frame_budget = job.frame_budget,
            "Job received",
        );

        let outcome = match tokio::time::timeout(self.job_timeout, self.execute(&mut job, &request))
            .await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(PipelineError::Timeout {
                stage: job.state().stage_in_progress(),
                elapsed_ms: job.elapsed_ms().max(0) as u64,
            }),
        };

        match outcome {
            Ok((summary, archive_path)) => {
                job.advance(JobState::Completed);

                let workspace_path = job
                    .workspace
                    .as_ref()
                    .map(|w| w.path().to_path_buf())
                    .unwrap_or_else(|| self.temp_root.join(job.id.to_string()));
                let guard = self.cleanup.schedule(job.id, workspace_path);

                tracing::info!(
                    job_id = %job.id,
                    frames_extracted = summary.frames_extracted,
                    frames_analyzed = summary.frames_analyzed,
                    scores_aggregated = summary.scores_aggregated,
                    average_score = summary.average_score,
                    elapsed_ms = job.elapsed_ms(),
                    "Job completed",
                );

                Ok(CompletedJob {
                    job_id: job.id,
                    summary,
                    archive_path,
                    cleanup_delay: self.cleanup.delay(),
                    guard,
                })
            }
            Err(error) => {
                job.fail(&error);

                tracing::warn!(
                    job_id = %job.id,
                    stage = %error.stage(),
                    code = error.code(),
                    error = %error,
                    elapsed_ms = job.elapsed_ms(),
                    "Job failed",
                );

                if let Some(workspace) = &job.workspace {
                    self.cleanup.discard(job.id, workspace.path().to_path_buf());
                }

                Err(JobFailure::new(job.id, error)
                    .with_workspace(self.temp_root.join(job.id.to_string())))
            }
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        request: &JobRequest,
    ) -> Result<(Summary, PathBuf), PipelineError> {
        let workspace = Workspace::allocate(&self.temp_root, job.id).await?;
        job.workspace = Some(workspace.clone());

        let video_path = workspace.save_video(&request.file_name, &request.data).await?;
        job.video_path = Some(video_path.clone());
        job.advance(JobState::Saved);

        let extracted = self
            .extractor
            .extract(&video_path, workspace.path(), job.id, job.frame_budget)
            .await?;
        if !extracted.errors.is_empty() {
            return Err(PipelineError::Extraction {
                message: format!(
                    "{} frame(s) failed to extract ({} succeeded)",
                    extracted.errors.len(),
                    extracted.frame_count()
                ),
                frame_errors: extracted.errors,
            });
        }
        if extracted.frames.is_empty() {
            return Err(PipelineError::extraction("no frames could be extracted"));
        }
        job.advance(JobState::Extracted);

        let mut scores = self.detector.detect(workspace.path()).await?;
        let dropped = score::retain_extracted(&mut scores, &extracted.frames);
        if !dropped.is_empty() {
            tracing::warn!(
                job_id = %job.id,
                dropped = ?dropped,
                "Detector returned scores for unknown frames",
            );
        }
        let stats = score::aggregate(&scores);
        if stats.scores_aggregated < stats.frames_analyzed {
            tracing::warn!(
                job_id = %job.id,
                frames_analyzed = stats.frames_analyzed,
                scores_aggregated = stats.scores_aggregated,
                "Some scores had no usable scalar",
            );
        }
        job.advance(JobState::Scored);

        let annotated = self.annotator.annotate(workspace.path(), &scores).await?;
        if annotated.is_empty() {
            tracing::warn!(job_id = %job.id, "No frames were annotated");
        }
        job.advance(JobState::Annotated);

        let archive_path = package::package(&annotated.dir, &workspace.archive_base()).await?;
        job.advance(JobState::Packaged);

        let summary = Summary::new(job.id, job.frame_budget, extracted.frame_count(), stats);
        Ok((summary, archive_path))
    }
}
