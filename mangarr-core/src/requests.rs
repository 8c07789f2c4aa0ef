//! Entry points for enqueueing work and applying user edits.
//!
//! Every operation that creates a job wakes the monitor afterwards.

use std::fmt;
use std::sync::Arc;

use mangarr_model::{
    Arguments, Chapter, ChapterId, LibraryId, MangaId, MergeReport, VolumeId,
};

use crate::error::{CoreError, Result};
use crate::jobs::{EditChapterJob, MonitorMangaJob};
use crate::monitor::MonitorHandle;
use crate::progress::ProgressHub;
use crate::store::Store;

/// Request surface shared by whatever fronts the library (API, CLI).
#[derive(Clone)]
pub struct Requests {
    store: Arc<dyn Store>,
    progress: ProgressHub,
    monitor: MonitorHandle,
}

impl fmt::Debug for Requests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requests")
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl Requests {
    pub fn new(store: Arc<dyn Store>, progress: ProgressHub, monitor: MonitorHandle) -> Self {
        Self {
            store,
            progress,
            monitor,
        }
    }

    async fn enqueued(&self) {
        match self.store.job_counts().await {
            Ok(counts) => self.progress.backlog(counts).await,
            Err(err) => {
                tracing::warn!(target: "monitor::sweep", error = %err, "failed to refresh backlog counters");
            }
        }
        self.monitor.trigger();
    }

    /// Starts monitoring a series. `arguments` must carry the series `url`.
    pub async fn request_manga(
        &self,
        library_id: LibraryId,
        plugin: &str,
        arguments: Arguments,
    ) -> Result<MonitorMangaJob> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CoreError::InvalidRequest("`url` is required".into()))?
            .to_string();

        if self.store.library(library_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("library {library_id}")));
        }
        if self.store.find_manga_by_url(&url).await?.is_some() {
            return Err(CoreError::Conflict(format!("{url} is already monitored")));
        }

        let (job, created) = self
            .store
            .get_or_create_manga_job(MonitorMangaJob::new(library_id, plugin, url, arguments))
            .await?;
        tracing::info!(
            target: "monitor::manga",
            url = %job.url,
            plugin,
            created,
            "series requested"
        );
        self.enqueued().await;
        Ok(job)
    }

    /// Queues a metadata rewrite for one downloaded chapter.
    pub async fn request_edit_chapter(&self, chapter_id: ChapterId) -> Result<EditChapterJob> {
        let chapter = self
            .store
            .chapter(chapter_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("chapter {chapter_id}")))?;
        if !chapter.downloaded {
            return Err(CoreError::InvalidRequest(format!(
                "chapter {chapter_id} is not downloaded"
            )));
        }

        let job = EditChapterJob::new(chapter.id);
        if !self.store.insert_edit_job(job.clone()).await? {
            return Err(CoreError::Conflict(format!(
                "chapter {chapter_id} already has a pending edit"
            )));
        }
        self.enqueued().await;
        Ok(job)
    }

    /// Queues rewrites for every downloaded chapter of a volume.
    pub async fn request_edit_volume(&self, volume_id: VolumeId) -> Result<usize> {
        if self.store.volume(volume_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("volume {volume_id}")));
        }
        let chapters = self.store.chapters_for_volume(volume_id).await?;
        self.enqueue_edits(chapters, &format!("volume {volume_id}")).await
    }

    /// Queues rewrites for every downloaded chapter of a series.
    pub async fn request_edit_manga(&self, manga_id: MangaId) -> Result<usize> {
        if self.store.manga(manga_id).await?.is_none() {
            return Err(CoreError::NotFound(format!("manga {manga_id}")));
        }
        let chapters = self.store.chapters_for_manga(manga_id).await?;
        self.enqueue_edits(chapters, &format!("manga {manga_id}")).await
    }

    async fn enqueue_edits(&self, chapters: Vec<Chapter>, scope: &str) -> Result<usize> {
        let mut created = 0;
        for chapter in chapters.into_iter().filter(|chapter| chapter.downloaded) {
            if self.store.insert_edit_job(EditChapterJob::new(chapter.id)).await? {
                created += 1;
            }
        }
        if created == 0 {
            return Err(CoreError::Conflict(format!(
                "no chapters of {scope} need an edit"
            )));
        }
        self.enqueued().await;
        Ok(created)
    }

    /// Applies a user edit. User edits bypass field locks.
    pub async fn edit_manga(&self, manga_id: MangaId, patch: &Arguments) -> Result<MergeReport> {
        let mut manga = self
            .store
            .manga(manga_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("manga {manga_id}")))?;
        let report = manga.update_fields(patch, true);
        self.store.save_manga(manga).await?;
        Ok(report)
    }

    pub async fn edit_volume(&self, volume_id: VolumeId, patch: &Arguments) -> Result<MergeReport> {
        let mut volume = self
            .store
            .volume(volume_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("volume {volume_id}")))?;
        let report = volume.update_fields(patch, true);
        self.store.save_volume(volume).await?;
        Ok(report)
    }

    pub async fn edit_chapter(
        &self,
        chapter_id: ChapterId,
        patch: &Arguments,
    ) -> Result<MergeReport> {
        let mut chapter = self
            .store
            .chapter(chapter_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("chapter {chapter_id}")))?;
        let report = chapter.update_fields(patch, true);
        self.store.save_chapter(chapter).await?;
        Ok(report)
    }
}
