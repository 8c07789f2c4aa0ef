use std::path::{Path, PathBuf};

use mangarr_model::{Chapter, ChapterId};

use super::{PipelineContext, chapter_destination, publish_backlog};
use crate::archive::naming::edit_workdir;
use crate::archive::{ComicInfo, build_archive, extract_pages, move_file};
use crate::error::{CoreError, Result};
use crate::jobs::EditChapterJob;

/// How an [`EditChapterJob`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// The archive was rebuilt with fresh metadata; the job is gone.
    Repackaged { chapter_id: ChapterId, file: PathBuf },
    /// There is no archive to rewrite; the job was dropped.
    MissingSource,
    /// The job is kept and retried on a later sweep.
    Failed(String),
    /// Stop was requested before the archive was replaced.
    Cancelled,
}

/// Rewrites `ComicInfo.xml` inside an already placed chapter archive and
/// moves it to the chapter's current file name.
pub async fn run_edit_job(ctx: &PipelineContext, job: EditChapterJob) -> Result<EditOutcome> {
    let outcome = match ctx.store.chapter(job.chapter_id).await? {
        None => EditOutcome::MissingSource,
        Some(chapter) => {
            let workdir = edit_workdir(&ctx.cache_dir, &chapter.url);
            let outcome = match repackage(ctx, chapter, &workdir).await {
                Ok(outcome) => outcome,
                Err(err) => EditOutcome::Failed(err.to_string()),
            };
            remove_workdir(&workdir).await;
            outcome
        }
    };

    match &outcome {
        EditOutcome::Repackaged { file, .. } => {
            ctx.store.delete_edit_job(job.id).await?;
            tracing::info!(
                target: "monitor::edit",
                chapter = %job.chapter_id,
                file = %file.display(),
                "chapter repackaged"
            );
        }
        EditOutcome::MissingSource => {
            ctx.store.delete_edit_job(job.id).await?;
            tracing::warn!(
                target: "monitor::edit",
                chapter = %job.chapter_id,
                "chapter archive missing, dropping edit"
            );
        }
        EditOutcome::Failed(reason) => {
            tracing::warn!(
                target: "monitor::edit",
                chapter = %job.chapter_id,
                error = %reason,
                "chapter repackage failed"
            );
        }
        EditOutcome::Cancelled => {}
    }
    publish_backlog(ctx).await;

    if matches!(outcome, EditOutcome::Repackaged { .. }) {
        ctx.cooldown(ctx.config.edit_cooldown()).await;
    }
    Ok(outcome)
}

async fn repackage(
    ctx: &PipelineContext,
    mut chapter: Chapter,
    workdir: &Path,
) -> Result<EditOutcome> {
    let Some(source) = chapter.file.clone() else {
        return forget_download(ctx, chapter).await;
    };
    if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
        return forget_download(ctx, chapter).await;
    }

    let volume = ctx
        .store
        .volume(chapter.volume_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("volume {}", chapter.volume_id)))?;
    let manga = ctx
        .store
        .manga(volume.manga_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("manga {}", volume.manga_id)))?;

    remove_workdir(workdir).await;
    let members = {
        let source = source.clone();
        let workdir = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_pages(&source, &workdir))
            .await
            .map_err(|err| CoreError::Internal(err.to_string()))??
    };
    if ctx.is_stopped() {
        return Ok(EditOutcome::Cancelled);
    }

    let comicinfo = ComicInfo::from_records(&manga, &volume, &chapter).to_xml()?;
    let staging = workdir.with_extension("cbz");
    let staged = {
        let staging = staging.clone();
        let workdir = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            build_archive(&staging, &workdir, &members, &comicinfo)
        })
        .await
        .map_err(|err| CoreError::Internal(err.to_string()))??
    };

    let destination = match chapter_destination(ctx, &manga, &volume, &chapter).await {
        Ok(destination) => destination,
        Err(err) => {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(err);
        }
    };
    if let Err(err) = move_file(&staged, &destination).await {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(err.into());
    }

    if destination != source
        && let Err(err) = tokio::fs::remove_file(&source).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            target: "monitor::edit",
            file = %source.display(),
            error = %err,
            "failed to remove previous archive"
        );
    }

    chapter.file = Some(destination.clone());
    ctx.store.save_chapter(chapter.clone()).await?;
    Ok(EditOutcome::Repackaged {
        chapter_id: chapter.id,
        file: destination,
    })
}

/// The archive is gone, so the chapter no longer counts as downloaded.
async fn forget_download(ctx: &PipelineContext, mut chapter: Chapter) -> Result<EditOutcome> {
    if chapter.downloaded || chapter.file.is_some() {
        chapter.clear_download();
        ctx.store.save_chapter(chapter).await?;
    }
    Ok(EditOutcome::MissingSource)
}

async fn remove_workdir(workdir: &Path) {
    if let Err(err) = tokio::fs::remove_dir_all(workdir).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(
            target: "monitor::edit",
            dir = %workdir.display(),
            error = %err,
            "failed to clean edit work directory"
        );
    }
}
