//! Per-job workspace allocation, upload persistence and deletion.
//!
//! Every job owns `{temp_root}/{job_id}` exclusively:
//!
//! ```text
//! {job_id}/
//!   input.{ext}
//!   frames/
//!   annotated_results/
//!   {job_id}_annotated_frames.zip
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::types::JobId;

/// Subdirectory holding extracted frames.
pub const FRAMES_DIR: &str = "frames";

/// Subdirectory holding annotated frames; the archive mirrors its contents.
pub const ANNOTATED_DIR: &str = "annotated_results";

/// File stem of the persisted upload.
pub const VIDEO_STEM: &str = "input";

/// Video container extensions accepted for upload.
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv"];

/// Extension used when the upload carries none we can trust.
const FALLBACK_EXTENSION: &str = "bin";

/// An allocated job workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    job_id: JobId,
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace directory for `job_id` under `temp_root`.
    ///
    /// Fails with [`PipelineError::Storage`] if the directory cannot be
    /// created, including when it already exists: two jobs never share one.
    pub async fn allocate(temp_root: &Path, job_id: JobId) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(temp_root).await.map_err(|e| {
            PipelineError::Storage(format!(
                "cannot create temp root {}: {e}",
                temp_root.display()
            ))
        })?;

        let root = temp_root.join(job_id.to_string());
        tokio::fs::create_dir(&root).await.map_err(|e| {
            PipelineError::Storage(format!(
                "cannot allocate workspace {}: {e}",
                root.display()
            ))
        })?;

        tracing::debug!(job_id = %job_id, path = %root.display(), "Workspace allocated");
        Ok(Self { job_id, root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Archive path without the `.zip` extension.
    pub fn archive_base(&self) -> PathBuf {
        self.root.join(archive_stem(self.job_id))
    }

    /// Persist the uploaded video as `input.{ext}` and return its path.
    pub async fn save_video(&self, file_name: &str, data: &[u8]) -> Result<PathBuf, PipelineError> {
        let ext = video_extension(file_name).unwrap_or_else(|| FALLBACK_EXTENSION.to_string());
        let path = self.root.join(format!("{VIDEO_STEM}.{ext}"));

        tokio::fs::write(&path, data).await.map_err(|e| {
            PipelineError::Storage(format!("cannot write upload {}: {e}", path.display()))
        })?;

        tracing::debug!(
            job_id = %self.job_id,
            bytes = data.len(),
            path = %path.display(),
            "Upload saved",
        );
        Ok(path)
    }
}

/// Extracted-frames directory of the workspace at `root`.
pub fn frames_dir(root: &Path) -> PathBuf {
    root.join(FRAMES_DIR)
}

/// Annotated-frames directory of the workspace at `root`.
pub fn annotated_dir(root: &Path) -> PathBuf {
    root.join(ANNOTATED_DIR)
}

/// File stem of a job's archive: `{job_id}_annotated_frames`.
pub fn archive_stem(job_id: JobId) -> String {
    format!("{job_id}_annotated_frames")
}

/// Lower-cased extension of `file_name`, if it is a short alphanumeric token.
pub fn video_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    let plausible = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(ext)
}

/// Returns `true` if `file_name` carries a supported video extension.
pub fn is_supported_video(file_name: &str) -> bool {
    video_extension(file_name)
        .map(|ext| SUPPORTED_VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Remove a workspace tree. Best-effort and idempotent.
///
/// A missing directory counts as removed. Other failures are logged and
/// reported as `false`; they never propagate.
pub async fn delete(path: &Path) -> bool {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Workspace removed");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Workspace already removed");
            true
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::types::new_job_id;

    #[tokio::test]
    async fn allocate_creates_unique_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let a = Workspace::allocate(tmp.path(), new_job_id()).await.unwrap();
        let b = Workspace::allocate(tmp.path(), new_job_id()).await.unwrap();
        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn allocate_refuses_existing_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let id = new_job_id();
        Workspace::allocate(tmp.path(), id).await.unwrap();
        let err = Workspace::allocate(tmp.path(), id).await.unwrap_err();
        assert_matches!(err, PipelineError::Storage(_));
    }

    #[tokio::test]
    async fn allocate_fails_when_root_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let err = Workspace::allocate(&file, new_job_id()).await.unwrap_err();
        assert_matches!(err, PipelineError::Storage(_));
    }

    #[tokio::test]
    async fn save_video_keeps_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(tmp.path(), new_job_id()).await.unwrap();
        let path = ws.save_video("Clip.MP4", b"data").await.unwrap();
        assert_eq!(path, ws.path().join("input.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn save_video_falls_back_for_odd_names() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(tmp.path(), new_job_id()).await.unwrap();
        let path = ws.save_video("../../etc/passwd", b"x").await.unwrap();
        assert_eq!(path, ws.path().join("input.bin"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::allocate(tmp.path(), new_job_id()).await.unwrap();
        std::fs::create_dir_all(frames_dir(ws.path())).unwrap();
        std::fs::write(frames_dir(ws.path()).join("frame_0.jpg"), b"x").unwrap();

        assert!(delete(ws.path()).await);
        assert!(!ws.path().exists());
        assert!(delete(ws.path()).await);
    }

    #[test]
    fn supported_video_extensions() {
        assert!(is_supported_video("a.mp4"));
        assert!(is_supported_video("b.MOV"));
        assert!(!is_supported_video("c.gif"));
        assert!(!is_supported_video("noext"));
    }

    #[test]
    fn archive_base_uses_job_id() {
        let id = new_job_id();
        assert_eq!(archive_stem(id), format!("{id}_annotated_frames"));
    }
}
