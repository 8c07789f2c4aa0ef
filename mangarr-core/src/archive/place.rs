//! Atomic placement of finished archives.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use super::ArchiveError;

/// How long [`move_file`] waits for its source to appear.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Polls until `path` exists; false once `timeout` elapses.
pub async fn wait_for_file(
    path: &Path,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return true;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = OsString::from(dst.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Moves `src` to `dst` so that `dst` is either absent or complete.
///
/// Tries a plain rename first. When that fails (typically across
/// filesystems) the file is copied to `<dst>.partial`, renamed over `dst`
/// and the source removed.
pub async fn move_file(src: &Path, dst: &Path) -> Result<(), ArchiveError> {
    if !wait_for_file(src, WAIT_TIMEOUT, WAIT_INTERVAL).await {
        return Err(ArchiveError::SourceMissing(src.to_path_buf()));
    }
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ArchiveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                target: "archive",
                src = %src.display(),
                dst = %dst.display(),
                error = %err,
                "rename failed, copying through a partial file"
            );
            copy_into_place(src, dst).await
        }
    }
}

async fn copy_into_place(src: &Path, dst: &Path) -> Result<(), ArchiveError> {
    let partial = partial_path(dst);
    let result: std::io::Result<()> = async {
        tokio::fs::copy(src, &partial).await?;
        tokio::fs::rename(&partial, dst).await?;
        tokio::fs::remove_file(src).await
    }
    .await;

    if let Err(source) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(ArchiveError::Io {
            path: dst.to_path_buf(),
            source,
        });
    }
    Ok(())
}
