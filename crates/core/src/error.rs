use std::fmt;

use serde::Serialize;

use crate::extract::FrameError;

/// Pipeline stage a job was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Save,
    Extract,
    Score,
    Annotate,
    Package,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Extract => "extract",
            Self::Score => "score",
            Self::Annotate => "annotate",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal job errors, one kind per pipeline stage.
///
/// Per-frame extraction problems and malformed scores are recovered locally;
/// only the variants below abort a job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The upload could not be persisted or the workspace could not be allocated.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Extraction failed for the job. `frame_errors` itemizes per-frame causes.
    #[error("Extraction failed: {message}")]
    Extraction {
        message: String,
        frame_errors: Vec<FrameError>,
    },

    /// The detector was unavailable or failed internally.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// The annotated-frames directory could not be produced.
    #[error("Annotation failed: {0}")]
    Annotation(String),

    /// Nothing to package: the annotated directory is missing or empty.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// Filesystem or compression failure while writing the archive.
    #[error("Archive creation failed: {0}")]
    ArchiveCreation(String),

    /// The job ran past its deadline while in `stage`.
    #[error("Job timed out after {elapsed_ms}ms during {stage}")]
    Timeout { stage: Stage, elapsed_ms: u64 },
}

impl PipelineError {
    /// Job-level extraction failure without itemized frame errors.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
            frame_errors: Vec::new(),
        }
    }

    /// The stage this error aborts.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Storage(_) => Stage::Save,
            Self::Extraction { .. } => Stage::Extract,
            Self::Detection(_) => Stage::Score,
            Self::Annotation(_) => Stage::Annotate,
            Self::Packaging(_) | Self::ArchiveCreation(_) => Stage::Package,
            Self::Timeout { stage, .. } => *stage,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Extraction { .. } => "EXTRACTION_FAILED",
            Self::Detection(_) => "DETECTION_FAILED",
            Self::Annotation(_) => "ANNOTATION_FAILED",
            Self::Packaging(_) => "PACKAGING_FAILED",
            Self::ArchiveCreation(_) => "ARCHIVE_CREATION_FAILED",
            Self::Timeout { .. } => "JOB_TIMEOUT",
        }
    }
}
