//! Frame extraction capability and its ffmpeg-backed implementation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;
use crate::ffmpeg;
use crate::types::JobId;
use crate::workspace;

/// Extension of extracted frame files.
pub const FRAME_EXTENSION: &str = "jpg";

/// A frame written to disk by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRef {
    /// Identifier shared with the detector's ScoreMap (`frame_{index}`).
    pub id: String,
    pub index: usize,
    pub path: PathBuf,
    pub timestamp_secs: f64,
}

/// A single itemized extraction problem.
///
/// `index` is `None` for problems that are not tied to one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameError {
    pub index: Option<usize>,
    pub reason: String,
}

impl FrameError {
    pub fn at(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            reason: reason.into(),
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            index: None,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "frame {index}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Normalized extractor output.
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessResult {
    pub video_id: JobId,
    pub frames: Vec<FrameRef>,
    pub errors: Vec<FrameError>,
}

impl PreprocessResult {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Identifier of the frame at `index`.
pub fn frame_id(index: usize) -> String {
    format!("frame_{index}")
}

/// Timestamps of the frames to sample.
///
/// Samples `min(budget, total_frames)` frames (or `budget` when the frame
/// count is unknown), one at the centre of each equal slice of the duration.
pub fn plan_timestamps(duration_secs: f64, frame_budget: usize, total_frames: i64) -> Vec<f64> {
    if duration_secs <= 0.0 || frame_budget == 0 {
        return Vec::new();
    }

    let count = if total_frames > 0 {
        frame_budget.min(total_frames as usize)
    } else {
        frame_budget
    };

    let slot = duration_secs / count as f64;
    (0..count).map(|i| slot * (i as f64 + 0.5)).collect()
}

/// Capability that samples frames from a video into a workspace.
///
/// Per-frame problems are itemized in [`PreprocessResult::errors`]; an `Err`
/// is reserved for job-level failures (unreadable container, I/O).
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(
        &self,
        video_path: &Path,
        output_dir: &Path,
        job_id: JobId,
        frame_budget: usize,
    ) -> Result<PreprocessResult, PipelineError>;
}

/// [`FrameExtractor`] that shells out to `ffprobe` and `ffmpeg`.
///
/// Every invocation is bounded by `tool_timeout`. An inspection that times out
/// fails the job; a frame grab that times out is itemized like any other
/// frame error.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegFrameExtractor {
    tool_timeout: Duration,
}

impl FfmpegFrameExtractor {
    pub fn new(tool_timeout: Duration) -> Self {
        Self { tool_timeout }
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new(ffmpeg::DEFAULT_TOOL_TIMEOUT)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract(
        &self,
        video_path: &Path,
        output_dir: &Path,
        job_id: JobId,
        frame_budget: usize,
    ) -> Result<PreprocessResult, PipelineError> {
        let media = ffmpeg::inspect_video(video_path, self.tool_timeout)
            .await
            .map_err(|e| PipelineError::extraction(format!("cannot read video container: {e}")))?;

        if ffmpeg::first_video_stream(&media).is_none() {
            return Err(PipelineError::extraction("container has no video stream"));
        }

        let duration = ffmpeg::parse_duration(&media);
        let total_frames = ffmpeg::parse_total_frames(&media);
        let timestamps = plan_timestamps(duration, frame_budget, total_frames);
        if timestamps.is_empty() {
            return Err(PipelineError::extraction(format!(
                "video has no decodable duration ({duration}s)"
            )));
        }

        let frames_dir = workspace::frames_dir(output_dir);
        tokio::fs::create_dir_all(&frames_dir).await.map_err(|e| {
            PipelineError::extraction(format!(
                "cannot create frames directory {}: {e}",
                frames_dir.display()
            ))
        })?;

        tracing::debug!(
            job_id = %job_id,
            duration_secs = duration,
            total_frames,
            planned = timestamps.len(),
            "Extracting frames",
        );

        let mut frames = Vec::with_capacity(timestamps.len());
        let mut errors = Vec::new();

        for (index, timestamp_secs) in timestamps.into_iter().enumerate() {
            let id = frame_id(index);
            let path = frames_dir.join(format!("{id}.{FRAME_EXTENSION}"));

            if let Err(e) =
                ffmpeg::extract_frame(video_path, &path, timestamp_secs, self.tool_timeout).await
            {
                errors.push(FrameError::at(index, e.to_string()));
                continue;
            }

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => frames.push(FrameRef {
                    id,
                    index,
                    path,
                    timestamp_secs,
                }),
                Ok(_) => errors.push(FrameError::at(index, "ffmpeg wrote an empty frame")),
                Err(_) => errors.push(FrameError::at(
                    index,
                    format!("no frame decoded at {timestamp_secs:.3}s"),
                )),
            }
        }

        if !errors.is_empty() {
            tracing::warn!(
                job_id = %job_id,
                extracted = frames.len(),
                failed = errors.len(),
                "Frame extraction reported errors",
            );
        }

        Ok(PreprocessResult {
            video_id: job_id,
            frames,
            errors,
        })
    }
}
