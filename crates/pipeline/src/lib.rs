//! Job sequencing and workspace lifecycle for the deepfake video pipeline.

pub mod cleanup;
pub mod job;
pub mod orchestrator;

pub use cleanup::{CleanupScheduler, DeliveryGuard, CLEANUP_DELAY};
pub use job::{Job, JobFailure, JobState, DEFAULT_FRAME_BUDGET, MAX_FRAME_BUDGET};
pub use orchestrator::{CompletedJob, JobRequest, Pipeline, DEFAULT_JOB_TIMEOUT};
