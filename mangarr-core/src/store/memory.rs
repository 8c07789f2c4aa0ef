use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mangarr_model::{
    Chapter, ChapterId, JobId, Library, LibraryId, Manga, MangaId, Volume,
    VolumeId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CatalogStore, JobCounts, JobStore, StoreError, StoreResult};
use crate::jobs::{EditChapterJob, MonitorChapterJob, MonitorMangaJob};

#[derive(Default, Clone)]
struct StoreState {
    libraries: HashMap<LibraryId, Library>,
    manga: HashMap<MangaId, Manga>,
    volumes: HashMap<VolumeId, Volume>,
    chapters: HashMap<ChapterId, Chapter>,
    manga_jobs: HashMap<JobId, MonitorMangaJob>,
    chapter_jobs: HashMap<JobId, MonitorChapterJob>,
    edit_jobs: HashMap<JobId, EditChapterJob>,
}

/// On-disk shape of the store.
#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    libraries: Vec<Library>,
    #[serde(default)]
    manga: Vec<Manga>,
    #[serde(default)]
    volumes: Vec<Volume>,
    #[serde(default)]
    chapters: Vec<Chapter>,
    #[serde(default)]
    manga_jobs: Vec<MonitorMangaJob>,
    #[serde(default)]
    chapter_jobs: Vec<MonitorChapterJob>,
    #[serde(default)]
    edit_jobs: Vec<EditChapterJob>,
}

fn keyed<K: std::hash::Hash + Eq, V>(
    records: Vec<V>,
    key: impl Fn(&V) -> K,
) -> HashMap<K, V> {
    records.into_iter().map(|r| (key(&r), r)).collect()
}

impl From<Snapshot> for StoreState {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            libraries: keyed(snapshot.libraries, |r| r.id),
            manga: keyed(snapshot.manga, |r| r.id),
            volumes: keyed(snapshot.volumes, |r| r.id),
            chapters: keyed(snapshot.chapters, |r| r.id),
            manga_jobs: keyed(snapshot.manga_jobs, |r| r.id),
            chapter_jobs: keyed(snapshot.chapter_jobs, |r| r.id),
            edit_jobs: keyed(snapshot.edit_jobs, |r| r.id),
        }
    }
}

impl StoreState {
    fn snapshot(&self) -> Snapshot {
        fn sorted<K, V: Clone>(
            map: &HashMap<K, V>,
            key: impl Fn(&V) -> Uuid,
        ) -> Vec<V> {
            let mut values: Vec<V> = map.values().cloned().collect();
            values.sort_by_key(|v| key(v));
            values
        }

        Snapshot {
            libraries: sorted(&self.libraries, |r| r.id.to_uuid()),
            manga: sorted(&self.manga, |r| r.id.to_uuid()),
            volumes: sorted(&self.volumes, |r| r.id.to_uuid()),
            chapters: sorted(&self.chapters, |r| r.id.to_uuid()),
            manga_jobs: sorted(&self.manga_jobs, |r| r.id.to_uuid()),
            chapter_jobs: sorted(&self.chapter_jobs, |r| r.id.to_uuid()),
            edit_jobs: sorted(&self.edit_jobs, |r| r.id.to_uuid()),
        }
    }

    fn volume_ids_for(&self, manga_id: MangaId) -> Vec<VolumeId> {
        self.volumes
            .values()
            .filter(|v| v.manga_id == manga_id)
            .map(|v| v.id)
            .collect()
    }
}

/// Map-backed store with optional JSON snapshot durability.
///
/// With a snapshot path every mutation rewrites the snapshot through a
/// temporary file and a rename, so a crash leaves either the old or the new
/// state on disk.
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    snapshot: Option<PathBuf>,
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryStore");
        if let Ok(state) = self.state.try_read() {
            debug
                .field("manga", &state.manga.len())
                .field("chapters", &state.chapters.len())
                .field("manga_jobs", &state.manga_jobs.len())
                .field("chapter_jobs", &state.chapter_jobs.len())
                .field("edit_jobs", &state.edit_jobs.len());
        }
        debug.field("snapshot", &self.snapshot).finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Volatile store, nothing survives the process.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshot: None,
        }
    }

    /// Loads `path` when it exists and persists every mutation back to it.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                StoreState::from(snapshot)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                StoreState::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        tracing::info!(
            target: "store",
            path = %path.display(),
            manga = state.manga.len(),
            pending = state.manga_jobs.len()
                + state.chapter_jobs.len()
                + state.edit_jobs.len(),
            "store opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    async fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&state.snapshot())?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|source| {
                StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                }
            })?;
        }
        tokio::fs::write(&tmp, bytes).await.map_err(|source| {
            StoreError::Io {
                path: tmp.clone(),
                source,
            }
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|source| {
            StoreError::Io {
                path: path.clone(),
                source,
            }
        })
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut StoreState) -> StoreResult<T> + Send,
    ) -> StoreResult<T>
    where
        T: Send,
    {
        let mut state = self.state.write().await;
        if self.snapshot.is_none() {
            return apply(&mut *state);
        }
        // Memory only changes once the snapshot holding the change is on disk.
        let mut next = state.clone();
        let out = apply(&mut next)?;
        self.persist(&next).await?;
        *state = next;
        Ok(out)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn save_library(&self, library: Library) -> StoreResult<()> {
        self.mutate(|state| {
            if state
                .libraries
                .values()
                .any(|l| l.name == library.name && l.id != library.id)
            {
                return Err(StoreError::Conflict(format!(
                    "library name {}",
                    library.name
                )));
            }
            state.libraries.insert(library.id, library);
            Ok(())
        })
        .await
    }

    async fn library(&self, id: LibraryId) -> StoreResult<Option<Library>> {
        Ok(self.state.read().await.libraries.get(&id).cloned())
    }

    async fn libraries(&self) -> StoreResult<Vec<Library>> {
        Ok(self.state.read().await.libraries.values().cloned().collect())
    }

    async fn manga(&self, id: MangaId) -> StoreResult<Option<Manga>> {
        Ok(self.state.read().await.manga.get(&id).cloned())
    }

    async fn manga_by_url(
        &self,
        library_id: LibraryId,
        url: &str,
    ) -> StoreResult<Option<Manga>> {
        Ok(self
            .state
            .read()
            .await
            .manga
            .values()
            .find(|m| m.library_id == library_id && m.url == url)
            .cloned())
    }

    async fn find_manga_by_url(&self, url: &str) -> StoreResult<Option<Manga>> {
        Ok(self
            .state
            .read()
            .await
            .manga
            .values()
            .find(|m| m.url == url)
            .cloned())
    }

    async fn all_manga(&self) -> StoreResult<Vec<Manga>> {
        Ok(self.state.read().await.manga.values().cloned().collect())
    }

    async fn stale_manga(
        &self,
        threshold: DateTime<Utc>,
    ) -> StoreResult<Vec<Manga>> {
        Ok(self
            .state
            .read()
            .await
            .manga
            .values()
            .filter(|m| m.is_stale(threshold))
            .cloned()
            .collect())
    }

    async fn save_manga(&self, manga: Manga) -> StoreResult<()> {
        self.mutate(|state| {
            if state
                .manga
                .values()
                .any(|m| m.url == manga.url && m.id != manga.id)
            {
                return Err(StoreError::Conflict(format!(
                    "manga url {}",
                    manga.url
                )));
            }
            state.manga.insert(manga.id, manga);
            Ok(())
        })
        .await
    }

    async fn delete_manga(&self, id: MangaId) -> StoreResult<()> {
        self.mutate(|state| {
            if state.manga.remove(&id).is_none() {
                return Err(StoreError::NotFound(format!("manga {id}")));
            }
            let volumes = state.volume_ids_for(id);
            let chapters: Vec<ChapterId> = state
                .chapters
                .values()
                .filter(|c| volumes.contains(&c.volume_id))
                .map(|c| c.id)
                .collect();

            state.volumes.retain(|_, v| v.manga_id != id);
            state.chapters.retain(|_, c| !volumes.contains(&c.volume_id));
            state.chapter_jobs.retain(|_, j| j.manga_id != id);
            state.manga_jobs.retain(|_, j| j.manga_id != Some(id));
            state.edit_jobs.retain(|_, j| !chapters.contains(&j.chapter_id));
            Ok(())
        })
        .await
    }

    async fn volume(&self, id: VolumeId) -> StoreResult<Option<Volume>> {
        Ok(self.state.read().await.volumes.get(&id).cloned())
    }

    async fn volumes_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<Volume>> {
        let state = self.state.read().await;
        let mut volumes: Vec<Volume> = state
            .volumes
            .values()
            .filter(|v| v.manga_id == manga_id)
            .cloned()
            .collect();
        volumes.sort_by_key(|v| v.id);
        Ok(volumes)
    }

    async fn save_volume(&self, volume: Volume) -> StoreResult<()> {
        self.mutate(|state| {
            if !state.manga.contains_key(&volume.manga_id) {
                return Err(StoreError::NotFound(format!(
                    "manga {}",
                    volume.manga_id
                )));
            }
            state.volumes.insert(volume.id, volume);
            Ok(())
        })
        .await
    }

    async fn chapter(&self, id: ChapterId) -> StoreResult<Option<Chapter>> {
        Ok(self.state.read().await.chapters.get(&id).cloned())
    }

    async fn chapter_by_url(
        &self,
        volume_id: VolumeId,
        url: &str,
    ) -> StoreResult<Option<Chapter>> {
        Ok(self
            .state
            .read()
            .await
            .chapters
            .values()
            .find(|c| c.volume_id == volume_id && c.url == url)
            .cloned())
    }

    async fn chapters_for_volume(
        &self,
        volume_id: VolumeId,
    ) -> StoreResult<Vec<Chapter>> {
        let state = self.state.read().await;
        let mut chapters: Vec<Chapter> = state
            .chapters
            .values()
            .filter(|c| c.volume_id == volume_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.id);
        Ok(chapters)
    }

    async fn chapters_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<Chapter>> {
        let state = self.state.read().await;
        let volumes = state.volume_ids_for(manga_id);
        let mut chapters: Vec<Chapter> = state
            .chapters
            .values()
            .filter(|c| volumes.contains(&c.volume_id))
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.id);
        Ok(chapters)
    }

    async fn save_chapter(&self, chapter: Chapter) -> StoreResult<()> {
        self.mutate(|state| {
            if !state.volumes.contains_key(&chapter.volume_id) {
                return Err(StoreError::NotFound(format!(
                    "volume {}",
                    chapter.volume_id
                )));
            }
            if state
                .chapters
                .values()
                .any(|c| c.url == chapter.url && c.id != chapter.id)
            {
                return Err(StoreError::Conflict(format!(
                    "chapter url {}",
                    chapter.url
                )));
            }
            state.chapters.insert(chapter.id, chapter);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_or_create_manga_job(
        &self,
        candidate: MonitorMangaJob,
    ) -> StoreResult<(MonitorMangaJob, bool)> {
        self.mutate(|state| {
            if let Some(existing) = state.manga_jobs.values().find(|j| {
                j.library_id == candidate.library_id && j.url == candidate.url
            }) {
                return Ok((existing.clone(), false));
            }
            state.manga_jobs.insert(candidate.id, candidate.clone());
            Ok((candidate, true))
        })
        .await
    }

    async fn manga_job_by_key(
        &self,
        library_id: LibraryId,
        url: &str,
    ) -> StoreResult<Option<MonitorMangaJob>> {
        Ok(self
            .state
            .read()
            .await
            .manga_jobs
            .values()
            .find(|j| j.library_id == library_id && j.url == url)
            .cloned())
    }

    async fn manga_jobs(&self) -> StoreResult<Vec<MonitorMangaJob>> {
        let mut jobs: Vec<MonitorMangaJob> =
            self.state.read().await.manga_jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn save_manga_job(&self, job: MonitorMangaJob) -> StoreResult<()> {
        self.mutate(|state| {
            state.manga_jobs.insert(job.id, job);
            Ok(())
        })
        .await
    }

    async fn delete_manga_job(&self, id: JobId) -> StoreResult<()> {
        self.mutate(|state| {
            state.manga_jobs.remove(&id);
            Ok(())
        })
        .await
    }

    async fn chapter_jobs(&self) -> StoreResult<Vec<MonitorChapterJob>> {
        let mut jobs: Vec<MonitorChapterJob> =
            self.state.read().await.chapter_jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn chapter_jobs_for_manga(
        &self,
        manga_id: MangaId,
    ) -> StoreResult<Vec<MonitorChapterJob>> {
        let mut jobs: Vec<MonitorChapterJob> = self
            .state
            .read()
            .await
            .chapter_jobs
            .values()
            .filter(|j| j.manga_id == manga_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn insert_chapter_jobs(
        &self,
        jobs: Vec<MonitorChapterJob>,
    ) -> StoreResult<usize> {
        self.mutate(|state| {
            let mut inserted = 0;
            for job in jobs {
                if state.chapter_jobs.values().any(|j| j.url == job.url) {
                    continue;
                }
                state.chapter_jobs.insert(job.id, job);
                inserted += 1;
            }
            Ok(inserted)
        })
        .await
    }

    async fn save_chapter_job(&self, job: MonitorChapterJob) -> StoreResult<()> {
        self.mutate(|state| {
            state.chapter_jobs.insert(job.id, job);
            Ok(())
        })
        .await
    }

    async fn delete_chapter_job(&self, id: JobId) -> StoreResult<()> {
        self.mutate(|state| {
            state.chapter_jobs.remove(&id);
            Ok(())
        })
        .await
    }

    async fn edit_jobs(&self) -> StoreResult<Vec<EditChapterJob>> {
        let mut jobs: Vec<EditChapterJob> =
            self.state.read().await.edit_jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn edit_job_for_chapter(
        &self,
        chapter_id: ChapterId,
    ) -> StoreResult<Option<EditChapterJob>> {
        Ok(self
            .state
            .read()
            .await
            .edit_jobs
            .values()
            .find(|j| j.chapter_id == chapter_id)
            .cloned())
    }

    async fn insert_edit_job(&self, job: EditChapterJob) -> StoreResult<bool> {
        self.mutate(|state| {
            if state.edit_jobs.values().any(|j| j.chapter_id == job.chapter_id) {
                return Ok(false);
            }
            state.edit_jobs.insert(job.id, job);
            Ok(true)
        })
        .await
    }

    async fn delete_edit_job(&self, id: JobId) -> StoreResult<()> {
        self.mutate(|state| {
            state.edit_jobs.remove(&id);
            Ok(())
        })
        .await
    }

    async fn job_counts(&self) -> StoreResult<JobCounts> {
        let state = self.state.read().await;
        Ok(JobCounts {
            manga: state.manga_jobs.len(),
            chapters: state.chapter_jobs.len(),
            edits: state.edit_jobs.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mangarr_model::Arguments;
    use tempfile::TempDir;

    fn seeded_manga(library: &Library) -> Manga {
        Manga::new(library.id, "manga_example", "https://x/m/1", "/tmp/m")
    }

    #[tokio::test]
    async fn get_or_create_is_keyed_by_library_and_url() {
        let store = InMemoryStore::new();
        let library = Library::new("main", "/tmp/lib");

        let first = MonitorMangaJob::new(
            library.id,
            "manga_example",
            "https://x/m/1",
            Arguments::new(),
        );
        let (job, created) =
            store.get_or_create_manga_job(first.clone()).await.unwrap();
        assert!(created);
        assert_eq!(job.id, first.id);

        let again = MonitorMangaJob::new(
            library.id,
            "manga_other",
            "https://x/m/1",
            Arguments::new(),
        );
        let (job, created) = store.get_or_create_manga_job(again).await.unwrap();
        assert!(!created);
        assert_eq!(job.id, first.id);
        assert_eq!(store.job_counts().await.unwrap().manga, 1);
    }

    #[tokio::test]
    async fn chapter_jobs_are_unique_by_url() {
        let store = InMemoryStore::new();
        let manga_id = MangaId::new();
        let jobs = vec![
            MonitorChapterJob::new(manga_id, "p", "c1", Arguments::new()),
            MonitorChapterJob::new(manga_id, "p", "c2", Arguments::new()),
            MonitorChapterJob::new(manga_id, "p", "c1", Arguments::new()),
        ];
        assert_eq!(store.insert_chapter_jobs(jobs).await.unwrap(), 2);

        let again = vec![MonitorChapterJob::new(manga_id, "p", "c2", Arguments::new())];
        assert_eq!(store.insert_chapter_jobs(again).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn chapter_urls_are_unique() {
        let store = InMemoryStore::new();
        let library = Library::new("main", "/tmp/lib");
        let manga = seeded_manga(&library);
        let volume = Volume::new(manga.id, 1.0);
        store.save_manga(manga).await.unwrap();
        store.save_volume(volume.clone()).await.unwrap();

        store.save_chapter(Chapter::new(volume.id, "c1")).await.unwrap();
        let err = store
            .save_chapter(Chapter::new(volume.id, "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_manga_cascades() {
        let store = InMemoryStore::new();
        let library = Library::new("main", "/tmp/lib");
        let manga = seeded_manga(&library);
        let volume = Volume::new(manga.id, 1.0);
        let chapter = Chapter::new(volume.id, "c1");
        store.save_manga(manga.clone()).await.unwrap();
        store.save_volume(volume.clone()).await.unwrap();
        store.save_chapter(chapter.clone()).await.unwrap();
        store
            .insert_edit_job(EditChapterJob::new(chapter.id))
            .await
            .unwrap();
        store
            .insert_chapter_jobs(vec![MonitorChapterJob::new(
                manga.id,
                "p",
                "c2",
                Arguments::new(),
            )])
            .await
            .unwrap();

        store.delete_manga(manga.id).await.unwrap();

        assert!(store.volume(volume.id).await.unwrap().is_none());
        assert!(store.chapter(chapter.id).await.unwrap().is_none());
        assert_eq!(store.job_counts().await.unwrap(), JobCounts::default());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("store.json");
        let library = Library::new("main", dir.path().join("lib"));

        {
            let store = InMemoryStore::open(&path).await.unwrap();
            store.save_library(library.clone()).await.unwrap();
            store.save_manga(seeded_manga(&library)).await.unwrap();
        }

        let reopened = InMemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.libraries().await.unwrap(), vec![library]);
        assert_eq!(reopened.all_manga().await.unwrap().len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let path = state_dir.join("store.json");
        let kept = Library::new("main", dir.path().join("lib"));

        let store = InMemoryStore::open(&path).await.unwrap();
        store.save_library(kept.clone()).await.unwrap();

        std::fs::remove_dir_all(&state_dir).unwrap();
        std::fs::write(&state_dir, b"not a directory").unwrap();

        let err = store
            .save_library(Library::new("other", dir.path().join("other")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(store.libraries().await.unwrap(), vec![kept]);
    }
}
