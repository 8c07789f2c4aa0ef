use std::path::PathBuf;

use chrono::Utc;
use mangarr_model::{Chapter, ChapterId, Manga, Volume};

use super::{PipelineContext, chapter_destination, entry_number, publish_backlog};
use crate::archive::naming::cache_archive_path;
use crate::archive::{ArchiveError, CbzWriter, ComicInfo, move_file};
use crate::error::{CoreError, Result};
use crate::jobs::MonitorChapterJob;

/// How a [`MonitorChapterJob`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterOutcome {
    /// Packaged and placed in the series folder; the job is gone.
    Downloaded { chapter_id: ChapterId, file: PathBuf },
    /// The chapter was already on disk; the job is gone.
    AlreadyDownloaded { chapter_id: ChapterId },
    /// The source lists no pages yet; the job waits for the retry window.
    NoPages,
    /// A page (1-based) could not be fetched; the job waits for the retry
    /// window.
    PageFetchFailed { page: usize },
    /// Any other failure; the job waits for the retry window.
    Failed(String),
    /// Stop was requested mid-download; the job is untouched.
    Cancelled,
}

impl ChapterOutcome {
    /// True when the series folder now holds the chapter.
    pub fn touches_library(&self) -> bool {
        matches!(
            self,
            ChapterOutcome::Downloaded { .. } | ChapterOutcome::AlreadyDownloaded { .. }
        )
    }
}

/// Downloads one chapter and settles the job.
pub async fn run_chapter_job(
    ctx: &PipelineContext,
    mut job: MonitorChapterJob,
) -> Result<ChapterOutcome> {
    let outcome = match download_chapter(ctx, &job).await {
        Ok(outcome) => outcome,
        Err(err) => ChapterOutcome::Failed(err.to_string()),
    };
    ctx.progress.downloading(0, 0).await;

    match &outcome {
        ChapterOutcome::Downloaded { file, .. } => {
            ctx.store.delete_chapter_job(job.id).await?;
            tracing::info!(
                target: "monitor::chapter",
                url = %job.url,
                file = %file.display(),
                "chapter downloaded"
            );
        }
        ChapterOutcome::AlreadyDownloaded { .. } => {
            ctx.store.delete_chapter_job(job.id).await?;
            tracing::debug!(target: "monitor::chapter", url = %job.url, "chapter already downloaded");
        }
        ChapterOutcome::NoPages
        | ChapterOutcome::PageFetchFailed { .. }
        | ChapterOutcome::Failed(_) => {
            tracing::warn!(
                target: "monitor::chapter",
                url = %job.url,
                plugin = %job.plugin,
                outcome = ?outcome,
                "chapter download deferred"
            );
            job.mark_failed(Utc::now());
            ctx.store.save_chapter_job(job).await?;
        }
        ChapterOutcome::Cancelled => {
            tracing::info!(target: "monitor::chapter", url = %job.url, "chapter download cancelled");
        }
    }
    publish_backlog(ctx).await;

    if matches!(outcome, ChapterOutcome::Downloaded { .. }) {
        ctx.cooldown(ctx.config.download_cooldown()).await;
    }
    Ok(outcome)
}

async fn download_chapter(
    ctx: &PipelineContext,
    job: &MonitorChapterJob,
) -> Result<ChapterOutcome> {
    let manga = ctx
        .store
        .manga(job.manga_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("manga {}", job.manga_id)))?;

    let volume_number = entry_number(&job.arguments, "volume_number", 1.0);
    let volume = find_or_create_volume(ctx, &manga, volume_number).await?;

    let mut chapter = match ctx.store.chapter_by_url(volume.id, &job.url).await? {
        Some(chapter) => chapter,
        None => Chapter::new(volume.id, job.url.clone()),
    };
    let report = chapter.update_fields(&job.arguments, false);
    for error in &report.errors {
        tracing::warn!(
            target: "monitor::chapter",
            url = %job.url,
            field = error.key,
            error = %error.error,
            "skipping invalid field"
        );
    }
    ctx.store.save_chapter(chapter.clone()).await?;

    if chapter.downloaded {
        return Ok(ChapterOutcome::AlreadyDownloaded {
            chapter_id: chapter.id,
        });
    }

    let handle = ctx.plugins.resolve(&job.plugin).await;
    let pages = handle.get_pages(&job.arguments).await?;
    if pages.is_empty() {
        return Ok(ChapterOutcome::NoPages);
    }
    chapter.pin_page_count(pages.len());

    tokio::fs::create_dir_all(&ctx.cache_dir).await?;
    let staging = cache_archive_path(&ctx.cache_dir, &job.plugin, manga.name.value(), &job.url);
    let total = pages.len();
    // Dropping the writer before `finish` removes the partial archive.
    let mut writer = CbzWriter::create(&staging, total)?;
    for (index, page) in pages.iter().enumerate() {
        if ctx.is_stopped() {
            return Ok(ChapterOutcome::Cancelled);
        }
        let Some(bytes) = handle.download_page(page).await else {
            return Ok(ChapterOutcome::PageFetchFailed { page: index + 1 });
        };
        writer.add_page(&bytes)?;
        ctx.progress.downloading(index + 1, total).await;
    }

    let comicinfo = ComicInfo::from_records(&manga, &volume, &chapter).to_xml()?;
    let staged = writer.finish(&comicinfo)?;

    let destination = match chapter_destination(ctx, &manga, &volume, &chapter).await {
        Ok(destination) => destination,
        Err(err) => {
            discard(&staged).await;
            return Err(err);
        }
    };
    if let Err(err) = move_file(&staged, &destination).await {
        discard(&staged).await;
        return Err(err.into());
    }

    chapter.mark_downloaded(destination.clone());
    ctx.store.save_chapter(chapter.clone()).await?;
    Ok(ChapterOutcome::Downloaded {
        chapter_id: chapter.id,
        file: destination,
    })
}

/// Volumes are matched numerically, so `3` and `3.0` share one record.
async fn find_or_create_volume(
    ctx: &PipelineContext,
    manga: &Manga,
    number: f64,
) -> Result<Volume> {
    let existing = ctx
        .store
        .volumes_for_manga(manga.id)
        .await?
        .into_iter()
        .find(|volume| volume.has_number(number));
    if let Some(volume) = existing {
        return Ok(volume);
    }

    let volume = Volume::new(manga.id, number);
    ctx.store.save_volume(volume.clone()).await?;
    tracing::debug!(target: "monitor::chapter", manga = %manga.url, number, "volume created");
    Ok(volume)
}

async fn discard(path: &std::path::Path) {
    if let Err(err) = tokio::fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        let err = ArchiveError::Io {
            path: path.to_path_buf(),
            source: err,
        };
        tracing::warn!(target: "archive", error = %err, "failed to discard staged archive");
    }
}
