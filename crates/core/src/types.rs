/// Opaque, collision-free job identifier. Also names the job's workspace.
pub type JobId = uuid::Uuid;

/// Generate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4()
}
