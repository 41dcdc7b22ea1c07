//! Zip packaging of the annotated-frames directory.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;

/// Extension appended to the archive base path.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Compress every file under `annotated_dir` into `{archive_base}.zip`.
///
/// Entry names are relative to `annotated_dir` and written in sorted order.
/// An absent or empty directory is a [`PipelineError::Packaging`] error and
/// leaves no file behind; any later I/O or compression failure is a
/// [`PipelineError::ArchiveCreation`] error and the partial archive is
/// removed.
pub async fn package(annotated_dir: &Path, archive_base: &Path) -> Result<PathBuf, PipelineError> {
    let dir = annotated_dir.to_path_buf();
    let archive_path = archive_path(archive_base);
    let target = archive_path.clone();

    tokio::task::spawn_blocking(move || package_blocking(&dir, &target))
        .await
        .map_err(|e| PipelineError::ArchiveCreation(format!("packaging task failed: {e}")))??;

    Ok(archive_path)
}

/// `{archive_base}.zip`.
pub fn archive_path(archive_base: &Path) -> PathBuf {
    let mut name = archive_base.as_os_str().to_os_string();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

fn package_blocking(dir: &Path, archive_path: &Path) -> Result<(), PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::Packaging(format!(
            "annotated directory {} does not exist",
            dir.display()
        )));
    }

    let mut entries = Vec::new();
    collect_files(dir, dir, &mut entries).map_err(|e| {
        PipelineError::Packaging(format!("cannot list {}: {e}", dir.display()))
    })?;
    if entries.is_empty() {
        return Err(PipelineError::Packaging(format!(
            "annotated directory {} is empty",
            dir.display()
        )));
    }
    entries.sort();

    if let Err(e) = write_archive(dir, &entries, archive_path) {
        if let Err(rm) = std::fs::remove_file(archive_path) {
            if rm.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %archive_path.display(), error = %rm, "Cannot remove partial archive");
            }
        }
        return Err(PipelineError::ArchiveCreation(e.to_string()));
    }

    tracing::debug!(
        archive = %archive_path.display(),
        entries = entries.len(),
        "Archive written",
    );
    Ok(())
}

/// Relative paths (with `/` separators) of every regular file under `dir`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(name);
        }
    }
    Ok(())
}

fn write_archive(dir: &Path, entries: &[String], archive_path: &Path) -> zip::result::ZipResult<()> {
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for name in entries {
        zip.start_file(name.as_str(), options)?;
        let mut src = File::open(dir.join(name))?;
        io::copy(&mut src, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}
