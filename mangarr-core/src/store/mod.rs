//! Persistence contracts for catalog records and pending jobs.
//!
//! The pipeline is the only writer; callers outside it (request helpers)
//! only insert jobs or apply user edits.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mangarr_model::{
    Chapter, ChapterId, JobId, Library, LibraryId, Manga, MangaId, Volume,
    VolumeId,
};
use thiserror::Error;

use crate::jobs::{EditChapterJob, MonitorChapterJob, MonitorMangaJob};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store snapshot is invalid: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Number of pending jobs per family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub manga: usize,
    pub chapters: usize,
    pub edits: usize,
}

/// Libraries, series, volumes and chapters.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn save_library(&self, library: Library) -> StoreResult<()>;

    async fn library(&self, id: LibraryId) -> StoreResult<Option<Library>>;

    async fn libraries(&self) -> StoreResult<Vec<Library>>;

    async fn manga(&self, id: MangaId) -> StoreResult<Option<Manga>>;

    async fn manga_by_url(
        &self,
        library_id: LibraryId,
        url: &str,
    ) -> StoreResult<Option<Manga>>;

    /// Looks a url up across every library.
    async fn find_manga_by_url(&self, url: &str) -> StoreResult<Option<Manga>>;

    async fn all_manga(&self) -> StoreResult<Vec<Manga>>;

    /// Series whose `last_update` is older than `threshold`.
    async fn stale_manga(
        &self,
        threshold: DateTime<Utc>,
    ) -> StoreResult<Vec<Manga>>;

    /// Inserts or replaces; urls are unique across the catalog.
    async fn save_manga(&self, manga: Manga) -> StoreResult<()>;

    /// Removes a series with its volumes, chapters and pending jobs.
    async fn delete_manga(&self, id: MangaId) -> StoreResult<()>;

    async fn volume(&self, id: VolumeId) -> StoreResult<Option<Volume>>;

    async fn volumes_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<Volume>>;

    async fn save_volume(&self, volume: Volume) -> StoreResult<()>;

    async fn chapter(&self, id: ChapterId) -> StoreResult<Option<Chapter>>;

    async fn chapter_by_url(
        &self,
        volume_id: VolumeId,
        url: &str,
    ) -> StoreResult<Option<Chapter>>;

    async fn chapters_for_volume(
        &self,
        volume_id: VolumeId,
    ) -> StoreResult<Vec<Chapter>>;

    async fn chapters_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<Chapter>>;

    /// Inserts or replaces; urls are unique across the catalog.
    async fn save_chapter(&self, chapter: Chapter) -> StoreResult<()>;
}

/// Pending work records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Returns the existing job for `(library, url)` or inserts `candidate`.
    /// The flag is true when the candidate was inserted.
    async fn get_or_create_manga_job(
        &self,
        candidate: MonitorMangaJob,
    ) -> StoreResult<(MonitorMangaJob, bool)>;

    async fn manga_job_by_key(
        &self,
        library_id: LibraryId,
        url: &str,
    ) -> StoreResult<Option<MonitorMangaJob>>;

    async fn manga_jobs(&self) -> StoreResult<Vec<MonitorMangaJob>>;

    async fn save_manga_job(&self, job: MonitorMangaJob) -> StoreResult<()>;

    async fn delete_manga_job(&self, id: JobId) -> StoreResult<()>;

    async fn chapter_jobs(&self) -> StoreResult<Vec<MonitorChapterJob>>;

    async fn chapter_jobs_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<MonitorChapterJob>>;

    /// Inserts every job whose url has no pending job yet; returns how many
    /// were inserted.
    async fn insert_chapter_jobs(
        &self,
        jobs: Vec<MonitorChapterJob>,
    ) -> StoreResult<usize>;

    async fn save_chapter_job(&self, job: MonitorChapterJob) -> StoreResult<()>;

    async fn delete_chapter_job(&self, id: JobId) -> StoreResult<()>;

    async fn edit_jobs(&self) -> StoreResult<Vec<EditChapterJob>>;

    async fn edit_job_for_chapter(
        &self,
        chapter_id: ChapterId,
    ) -> StoreResult<Option<EditChapterJob>>;

    /// False when the chapter already has a pending edit.
    async fn insert_edit_job(&self, job: EditChapterJob) -> StoreResult<bool>;

    async fn delete_edit_job(&self, id: JobId) -> StoreResult<()>;

    async fn job_counts(&self) -> StoreResult<JobCounts>;
}

/// Everything the pipeline needs from persistence.
pub trait Store: CatalogStore + JobStore {}

impl<T: CatalogStore + JobStore> Store for T {}
