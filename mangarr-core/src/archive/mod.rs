//! CBZ packaging: page streaming, `ComicInfo.xml`, and atomic placement.

mod cbz;
mod comicinfo;
pub mod naming;
mod place;

pub use cbz::{CbzWriter, build_archive, extract_pages, list_members, read_member};
pub use comicinfo::{COMICINFO_NAME, ComicInfo};
pub use place::{WAIT_INTERVAL, WAIT_TIMEOUT, move_file, wait_for_file};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("source file never appeared: {0}")]
    SourceMissing(PathBuf),

    #[error("archive entry escapes the work directory: {0}")]
    UnsafeEntry(String),

    #[error("archive writer already closed")]
    Closed,
}

/// Removes every entry under `dir`, keeping the directory itself.
pub async fn clear_directory(dir: &std::path::Path) -> Result<usize, ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
            return Ok(0);
        }
        Err(err) => return Err(io_err(err)),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let file_type = entry.file_type().await.map_err(io_err)?;
        let result = if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(
                target: "archive",
                path = %path.display(),
                error = %err,
                "failed to clear cache entry"
            ),
        }
    }
    Ok(removed)
}
