use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::Utc;
use mangarr_model::{Arguments, Manga, MangaId, compare_numbers, union_arguments};
use serde_json::Value;

use super::{PipelineContext, entry_number, publish_backlog};
use crate::archive::naming::manga_folder;
use crate::error::{CoreError, Result};
use crate::jobs::{MonitorChapterJob, MonitorMangaJob};
use crate::plugin::required_str;

/// How a [`MonitorMangaJob`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MangaOutcome {
    /// Metadata merged and `new_chapters` download jobs enqueued; the job is
    /// gone.
    Synced {
        manga_id: MangaId,
        new_chapters: usize,
    },
    /// The job was kept with `last_run` stamped.
    Failed(String),
}

impl MangaOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MangaOutcome::Synced { .. })
    }
}

/// Runs one series synchronization and settles the job.
pub async fn run_manga_job(
    ctx: &PipelineContext,
    mut job: MonitorMangaJob,
) -> Result<MangaOutcome> {
    let outcome = match sync_manga(ctx, &job).await {
        Ok((manga_id, new_chapters)) => {
            ctx.store.delete_manga_job(job.id).await?;
            tracing::info!(
                target: "monitor::manga",
                url = %job.url,
                plugin = %job.plugin,
                new_chapters,
                "series synchronized"
            );
            MangaOutcome::Synced {
                manga_id,
                new_chapters,
            }
        }
        Err(err) => {
            tracing::warn!(
                target: "monitor::manga",
                url = %job.url,
                plugin = %job.plugin,
                error = %err,
                "series synchronization failed, will retry"
            );
            job.mark_failed(Utc::now());
            ctx.store.save_manga_job(job).await?;
            MangaOutcome::Failed(err.to_string())
        }
    };
    publish_backlog(ctx).await;
    Ok(outcome)
}

async fn sync_manga(
    ctx: &PipelineContext,
    job: &MonitorMangaJob,
) -> Result<(MangaId, usize)> {
    let handle = ctx.plugins.resolve(&job.plugin).await;

    let mut request = job.arguments.clone();
    request
        .entry("url")
        .or_insert_with(|| Value::String(job.url.clone()));

    let data = handle.get_manga(&request).await?;
    let url = required_str(&data, "url")?.to_string();

    let mut manga = match ctx.store.manga_by_url(job.library_id, &url).await? {
        Some(manga) => manga,
        None => {
            let library = ctx
                .store
                .library(job.library_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("library {}", job.library_id)))?;
            let folder = manga_folder(&library.folder, &url);
            tracing::debug!(
                target: "monitor::manga",
                %url,
                folder = %folder.display(),
                "creating series"
            );
            Manga::new(job.library_id, job.plugin.clone(), url.clone(), folder)
        }
    };

    let patch = union_arguments(&job.arguments, &data);
    let report = manga.update_fields(&patch, false);
    for error in &report.errors {
        tracing::warn!(
            target: "monitor::manga",
            %url,
            field = error.key,
            error = %error.error,
            "skipping invalid field"
        );
    }
    ctx.store.save_manga(manga.clone()).await?;

    let entries = handle.get_chapters(&patch).await?;
    let jobs = new_chapter_jobs(ctx, &manga, &job.plugin, entries).await?;
    let inserted = ctx.store.insert_chapter_jobs(jobs).await?;

    manga.last_update = Utc::now();
    ctx.store.save_manga(manga.clone()).await?;
    Ok((manga.id, inserted))
}

/// Sorted, deduplicated chapter entries minus the urls already known for
/// `manga`.
async fn new_chapter_jobs(
    ctx: &PipelineContext,
    manga: &Manga,
    plugin: &str,
    entries: Vec<Arguments>,
) -> Result<Vec<MonitorChapterJob>> {
    let mut known: HashSet<String> = ctx
        .store
        .chapter_jobs_for_manga(manga.id)
        .await?
        .into_iter()
        .map(|job| job.url)
        .collect();
    known.extend(
        ctx.store
            .chapters_for_manga(manga.id)
            .await?
            .into_iter()
            .map(|chapter| chapter.url),
    );

    Ok(sort_and_dedup(entries)
        .into_iter()
        .filter(|(url, _)| known.insert(url.clone()))
        .map(|(url, entry)| MonitorChapterJob::new(manga.id, plugin, url, entry))
        .collect())
}

/// Orders entries by `(volume_number, chapter_number)` and keeps the first
/// entry per url. Entries without a url are dropped.
pub(crate) fn sort_and_dedup(entries: Vec<Arguments>) -> Vec<(String, Arguments)> {
    let mut keyed: Vec<(f64, f64, String, Arguments)> = entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.get("url")?.as_str()?.to_string();
            let volume = entry_number(&entry, "volume_number", 1.0);
            let chapter = entry_number(&entry, "chapter_number", 0.0);
            Some((volume, chapter, url, entry))
        })
        .collect();

    keyed.sort_by(|a, b| match compare_numbers(a.0, b.0) {
        Ordering::Equal => compare_numbers(a.1, b.1),
        other => other,
    });

    let mut seen = HashSet::new();
    keyed
        .into_iter()
        .filter(|(_, _, url, _)| seen.insert(url.clone()))
        .map(|(_, _, url, entry)| (url, entry))
        .collect()
}
