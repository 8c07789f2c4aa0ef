use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mangarr_core::archive::naming::manga_folder;
use mangarr_core::archive::{list_members, read_member};
use mangarr_core::pipeline::{run_chapter_job, run_manga_job};
use mangarr_core::plugin::PluginResult;
use mangarr_core::{
    CatalogStore, ChapterOutcome, InMemoryStore, JobCounts, JobStore, MangaOutcome, Monitor,
    MonitorChapterJob, MonitorConfig, MonitorMangaJob, Notifier, NotifyConnector, PipelineContext,
    PageRef, PluginError, PluginRegistry, ProgressHub, Requests, RetryPolicy, SourcePlugin,
};
use mangarr_model::{Arguments, Chapter, Library, LibraryId, Manga, Volume};
use serde_json::{Value, json};
use tempfile::TempDir;

const SERIES_URL: &str = "https://example.org/series/1";

fn args(value: Value) -> Arguments {
    value.as_object().cloned().unwrap()
}

/// Scriptable source: chapter list, page lists and failure switches.
struct FakeSource {
    chapters: Mutex<Vec<Arguments>>,
    pages: Mutex<HashMap<String, Vec<PageRef>>>,
    broken_pages: Mutex<HashSet<String>>,
    page_arguments: Mutex<Vec<Arguments>>,
    fail_manga: AtomicBool,
    page_list_calls: AtomicUsize,
}

impl FakeSource {
    fn new() -> Self {
        let source = Self {
            chapters: Mutex::new(vec![
                args(json!({"url": "c2", "volume_number": 1, "chapter_number": 2})),
                args(json!({"url": "c1", "volume_number": 1, "chapter_number": 1, "name": "Arrival"})),
            ]),
            pages: Mutex::new(HashMap::new()),
            broken_pages: Mutex::new(HashSet::new()),
            page_arguments: Mutex::new(Vec::new()),
            fail_manga: AtomicBool::new(false),
            page_list_calls: AtomicUsize::new(0),
        };
        source.set_pages("c1", &["c1/p1", "c1/p2"]);
        source.set_pages("c2", &["c2/p1", "c2/p2"]);
        source
    }

    /// Each page carries a `token` only it is fetched with.
    fn set_pages(&self, chapter: &str, pages: &[&str]) {
        self.pages.lock().unwrap().insert(
            chapter.to_string(),
            pages
                .iter()
                .map(|p| PageRef::new(*p).with_arguments(args(json!({"token": format!("{p}#t")}))))
                .collect(),
        );
    }

    fn set_chapters(&self, chapters: Vec<Arguments>) {
        *self.chapters.lock().unwrap() = chapters;
    }
}

#[async_trait]
impl SourcePlugin for FakeSource {
    async fn search(&self, _query: &str, _language: Option<&str>) -> PluginResult<Vec<Arguments>> {
        Ok(Vec::new())
    }

    async fn get_manga(&self, _arguments: &Arguments) -> PluginResult<Arguments> {
        if self.fail_manga.load(Ordering::SeqCst) {
            return Err(PluginError::Request("source offline".into()));
        }
        Ok(args(json!({
            "name": "Test Series",
            "description": "A series used in tests",
            "genres": ["Action"],
        })))
    }

    async fn get_chapters(&self, _manga: &Arguments) -> PluginResult<Vec<Arguments>> {
        Ok(self.chapters.lock().unwrap().clone())
    }

    async fn get_pages(&self, chapter: &Arguments) -> PluginResult<Vec<PageRef>> {
        self.page_list_calls.fetch_add(1, Ordering::SeqCst);
        let url = chapter.get("url").and_then(Value::as_str).unwrap_or_default();
        Ok(self.pages.lock().unwrap().get(url).cloned().unwrap_or_default())
    }

    async fn download_page(
        &self,
        url: &str,
        page: &Arguments,
    ) -> PluginResult<Option<Vec<u8>>> {
        self.page_arguments.lock().unwrap().push(page.clone());
        if page.get("token").and_then(Value::as_str) != Some(format!("{url}#t").as_str()) {
            return Err(PluginError::Malformed(format!("no token for {url}")));
        }
        if self.broken_pages.lock().unwrap().contains(url) {
            return Ok(None);
        }
        Ok(Some(url.as_bytes().to_vec()))
    }
}

#[derive(Default)]
struct RecordingConnector {
    calls: Mutex<Vec<LibraryId>>,
}

impl RecordingConnector {
    fn calls_for(&self, library: LibraryId) -> usize {
        self.calls.lock().unwrap().iter().filter(|id| **id == library).count()
    }
}

#[async_trait]
impl NotifyConnector for RecordingConnector {
    fn name(&self) -> String {
        "recording".into()
    }

    async fn notify(&self, library: &Library) -> bool {
        self.calls.lock().unwrap().push(library.id);
        true
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    source: Arc<FakeSource>,
    plugin: String,
    library: Library,
    connector: Arc<RecordingConnector>,
    ctx: PipelineContext,
    monitor: Monitor,
    requests: Requests,
}

async fn harness() -> Harness {
    harness_with(InMemoryStore::new()).await
}

async fn harness_with(store: InMemoryStore) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(store);
    let library = Library::new("main", dir.path().join("library"));
    store.save_library(library.clone()).await.unwrap();

    let plugins = Arc::new(PluginRegistry::new(RetryPolicy::none()));
    let source = Arc::new(FakeSource::new());
    let plugin = plugins.register("manga", "example.org", source.clone()).await;
    plugins.mark_loaded();

    let notifier = Arc::new(Notifier::new());
    let connector = Arc::new(RecordingConnector::default());
    notifier.register(library.id, connector.clone()).await;

    let progress = ProgressHub::new();
    let ctx = PipelineContext::new(
        store.clone(),
        plugins,
        progress.clone(),
        dir.path().join("cache"),
        MonitorConfig::immediate(),
    );
    let monitor = Monitor::new(ctx.clone(), notifier);
    let requests = Requests::new(store.clone(), progress, monitor.handle());

    Harness {
        _dir: dir,
        store,
        source,
        plugin,
        library,
        connector,
        ctx,
        monitor,
        requests,
    }
}

impl Harness {
    fn manga_job(&self) -> MonitorMangaJob {
        MonitorMangaJob::new(
            self.library.id,
            self.plugin.clone(),
            SERIES_URL,
            args(json!({"url": SERIES_URL})),
        )
    }

    async fn seeded_manga(&self) -> Manga {
        let mut manga = Manga::new(
            self.library.id,
            self.plugin.clone(),
            SERIES_URL,
            manga_folder(&self.library.folder, SERIES_URL),
        );
        manga.name.set_value("Test Series".into(), false);
        self.store.save_manga(manga.clone()).await.unwrap();
        manga
    }

    fn chapter_job(&self, manga: &Manga, entry: Value) -> MonitorChapterJob {
        let entry = args(entry);
        let url = entry["url"].as_str().unwrap().to_string();
        MonitorChapterJob::new(manga.id, self.plugin.clone(), url, entry)
    }

    fn archive(&self, name: &str) -> PathBuf {
        manga_folder(&self.library.folder, SERIES_URL).join(name)
    }
}

#[tokio::test]
async fn series_sync_is_idempotent() {
    let h = harness().await;
    h.source.set_chapters(vec![
        args(json!({"url": "c1", "chapter_number": 1})),
        args(json!({"url": "c1", "chapter_number": 1})),
        args(json!({"chapter_number": 3})),
        args(json!({"url": "c2", "chapter_number": 2})),
    ]);

    for _ in 0..2 {
        let (job, _) = h.store.get_or_create_manga_job(h.manga_job()).await.unwrap();
        let outcome = run_manga_job(&h.ctx, job).await.unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
    }

    assert_eq!(h.store.all_manga().await.unwrap().len(), 1);
    let mut urls: Vec<String> = h
        .store
        .chapter_jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.url)
        .collect();
    urls.sort();
    assert_eq!(urls, ["c1", "c2"]);
    assert!(h.store.manga_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_series_sync_keeps_the_job() {
    let h = harness().await;
    h.source.fail_manga.store(true, Ordering::SeqCst);
    let (job, _) = h.store.get_or_create_manga_job(h.manga_job()).await.unwrap();

    let outcome = run_manga_job(&h.ctx, job).await.unwrap();
    assert!(matches!(outcome, MangaOutcome::Failed(_)));

    let jobs = h.store.manga_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].last_run.is_some());
    assert!(!jobs[0].is_due(Utc::now(), Duration::from_secs(3600)));
}

#[tokio::test]
async fn volume_numbers_match_numerically() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    h.source.set_pages("a", &["a/p1"]);
    h.source.set_pages("b", &["b/p1"]);

    let first = h.chapter_job(&manga, json!({"url": "a", "volume_number": 3, "chapter_number": 1}));
    let second = h.chapter_job(&manga, json!({"url": "b", "volume_number": 3.0, "chapter_number": 2}));
    for job in [first, second] {
        let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
        assert!(matches!(outcome, ChapterOutcome::Downloaded { .. }), "{outcome:?}");
    }

    let volumes = h.store.volumes_for_manga(manga.id).await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(*volumes[0].number.value(), 3.0);
    assert_eq!(h.store.chapters_for_volume(volumes[0].id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pages_are_fetched_with_their_own_arguments() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    let job = h.chapter_job(&manga, json!({"url": "c1", "chapter_number": 1}));

    let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
    assert!(matches!(outcome, ChapterOutcome::Downloaded { .. }), "{outcome:?}");

    let seen = h.source.page_arguments.lock().unwrap().clone();
    assert_eq!(seen, [args(json!({"token": "c1/p1#t"})), args(json!({"token": "c1/p2#t"}))]);
}

#[tokio::test]
async fn non_finite_volume_numbers_land_in_the_first_volume() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let h = harness_with(InMemoryStore::open(&state).await.unwrap()).await;
    let manga = h.seeded_manga().await;
    h.source.set_pages("n", &["n/p1"]);

    let job = h.chapter_job(&manga, json!({"url": "n", "volume_number": "NaN", "chapter_number": 5}));
    let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
    assert!(matches!(outcome, ChapterOutcome::Downloaded { .. }), "{outcome:?}");
    assert!(h.archive("Test Series - Vol. 1 Ch. 5.cbz").exists());

    let reopened = InMemoryStore::open(&state).await.unwrap();
    let volumes = reopened.volumes_for_manga(manga.id).await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(*volumes[0].number.value(), 1.0);
}

#[tokio::test]
async fn colliding_chapter_numbers_keep_separate_archives() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    h.source.set_pages("x1", &["x1/p1"]);
    h.source.set_pages("x2", &["x2/p1"]);

    let mut files = Vec::new();
    for url in ["x1", "x2"] {
        let job = h.chapter_job(&manga, json!({"url": url}));
        match run_chapter_job(&h.ctx, job).await.unwrap() {
            ChapterOutcome::Downloaded { file, .. } => files.push(file),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_ne!(files[0], files[1]);
    assert_eq!(files[0], h.archive("Test Series - Vol. 1 Ch. 0.cbz"));
    assert_eq!(read_member(&files[0], "1.png").unwrap(), b"x1/p1");
    assert_eq!(read_member(&files[1], "1.png").unwrap(), b"x2/p1");

    let chapters = h.store.chapters_for_manga(manga.id).await.unwrap();
    let mut owned: Vec<_> = chapters.iter().filter_map(|c| c.file.clone()).collect();
    owned.sort();
    files.sort();
    assert_eq!(owned, files);
}

#[tokio::test]
async fn chapters_without_pages_stay_armed() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    h.source.set_pages("c9", &[]);
    let job = h.chapter_job(&manga, json!({"url": "c9", "chapter_number": 9}));
    h.store.insert_chapter_jobs(vec![job.clone()]).await.unwrap();

    let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
    assert_eq!(outcome, ChapterOutcome::NoPages);

    let jobs = h.store.chapter_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    let stamped = jobs[0].last_run.unwrap();
    let retry = Duration::from_secs(3600);
    assert!(!jobs[0].is_due(stamped + chrono::Duration::minutes(30), retry));
    assert!(jobs[0].is_due(stamped + chrono::Duration::minutes(61), retry));

    // The kept job is not due, so a sweep finds nothing to do.
    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.passes, 0);
    assert_eq!(h.store.chapter_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_page_fetch_leaves_no_archive_behind() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    h.source.broken_pages.lock().unwrap().insert("c1/p2".into());
    let job = h.chapter_job(&manga, json!({"url": "c1", "volume_number": 1, "chapter_number": 1}));
    h.store.insert_chapter_jobs(vec![job.clone()]).await.unwrap();

    let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
    assert_eq!(outcome, ChapterOutcome::PageFetchFailed { page: 2 });

    assert!(!h.archive("Test Series - Vol. 1 Ch. 1.cbz").exists());
    let staged: Vec<_> = std::fs::read_dir(&h.ctx.cache_dir)
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(staged.is_empty(), "partial archive left in cache: {staged:?}");
    assert_eq!(h.store.chapter_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn downloaded_chapters_short_circuit() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    let volume = Volume::new(manga.id, 1.0);
    h.store.save_volume(volume.clone()).await.unwrap();
    let mut chapter = Chapter::new(volume.id, "c1");
    chapter.mark_downloaded(h.archive("existing.cbz"));
    h.store.save_chapter(chapter.clone()).await.unwrap();

    let job = h.chapter_job(&manga, json!({"url": "c1", "volume_number": 1}));
    h.store.insert_chapter_jobs(vec![job.clone()]).await.unwrap();

    let outcome = run_chapter_job(&h.ctx, job).await.unwrap();
    assert_eq!(
        outcome,
        ChapterOutcome::AlreadyDownloaded {
            chapter_id: chapter.id
        }
    );
    assert_eq!(h.source.page_list_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.chapter_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn one_sweep_downloads_a_requested_series() {
    let h = harness().await;
    let mut observer = h.ctx.progress.subscribe().await;
    h.requests
        .request_manga(h.library.id, &h.plugin, args(json!({"url": SERIES_URL})))
        .await
        .unwrap();

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.manga_synced, 1);
    assert_eq!(report.chapters_downloaded, 2);

    let manga = h.store.all_manga().await.unwrap();
    assert_eq!(manga.len(), 1);
    assert_eq!(manga[0].name.value(), "Test Series");

    let volumes = h.store.volumes_for_manga(manga[0].id).await.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(*volumes[0].number.value(), 1.0);

    let chapters = h.store.chapters_for_manga(manga[0].id).await.unwrap();
    assert_eq!(chapters.len(), 2);
    assert!(chapters.iter().all(|chapter| chapter.downloaded));

    for name in ["Test Series - Vol. 1 Ch. 1.cbz", "Test Series - Vol. 1 Ch. 2.cbz"] {
        let archive = h.archive(name);
        assert!(archive.exists(), "missing {name}");
        assert_eq!(
            list_members(&archive).unwrap(),
            ["1.png", "2.png", "ComicInfo.xml"]
        );
    }
    let info = read_member(&h.archive("Test Series - Vol. 1 Ch. 1.cbz"), "ComicInfo.xml").unwrap();
    let info = String::from_utf8(info).unwrap();
    assert!(info.contains("<Series>Test Series</Series>"));
    assert!(info.contains("<Title>Arrival</Title>"));
    assert!(info.contains("<PageCount>2</PageCount>"));

    assert_eq!(h.store.job_counts().await.unwrap(), JobCounts::default());
    assert_eq!(h.connector.calls_for(h.library.id), 1);

    let progress = observer.drain().clone();
    assert_eq!(progress["downloading"], json!({"current": 0, "of": 0}));
    assert_eq!(progress["scanning"], json!({"manga": 0, "chapters": 0}));
}

#[tokio::test]
async fn libraries_touched_twice_are_notified_once() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    h.store
        .insert_chapter_jobs(vec![
            h.chapter_job(&manga, json!({"url": "c1", "chapter_number": 1})),
            h.chapter_job(&manga, json!({"url": "c2", "chapter_number": 2})),
        ])
        .await
        .unwrap();

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.chapters_downloaded, 2);
    assert_eq!(report.libraries_notified, 1);
    assert_eq!(h.connector.calls_for(h.library.id), 1);
}

#[tokio::test]
async fn paused_downloads_do_not_spin() {
    let h = harness().await;
    let handle = h.monitor.handle();
    assert!(handle.toggle_download_pause());
    h.store.get_or_create_manga_job(h.manga_job()).await.unwrap();

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.passes, 1);
    assert_eq!(report.manga_synced, 1);
    assert_eq!(report.chapters_downloaded, 0);
    assert_eq!(h.store.chapter_jobs().await.unwrap().len(), 2);

    assert!(!handle.toggle_download_pause());
    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.chapters_downloaded, 2);
    assert!(h.store.chapter_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_series_are_resynchronized() {
    let h = harness().await;
    let mut manga = h.seeded_manga().await;
    manga.last_update = Utc::now() - chrono::Duration::days(2);
    h.store.save_manga(manga.clone()).await.unwrap();
    h.source.set_chapters(Vec::new());

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.promoted, 1);
    assert_eq!(report.manga_synced, 1);

    let refreshed = h.store.manga(manga.id).await.unwrap().unwrap();
    assert!(refreshed.last_update > manga.last_update);
    assert!(h.store.manga_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn failing_stale_series_do_not_spin() {
    let h = harness().await;
    let mut manga = h.seeded_manga().await;
    manga.last_update = Utc::now() - chrono::Duration::days(2);
    h.store.save_manga(manga).await.unwrap();
    h.source.fail_manga.store(true, Ordering::SeqCst);

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.passes, 1);
    assert_eq!(report.manga_failed, 1);
    assert_eq!(h.store.manga_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn repackaging_refreshes_metadata_and_keeps_pages() {
    let h = harness().await;
    h.store.get_or_create_manga_job(h.manga_job()).await.unwrap();
    h.monitor.sweep().await.unwrap();

    let manga = h.store.all_manga().await.unwrap().remove(0);
    let old_archive = h.archive("Test Series - Vol. 1 Ch. 1.cbz");
    let pages_before = read_member(&old_archive, "1.png").unwrap();

    h.requests
        .edit_manga(manga.id, &args(json!({"name": "Renamed Series"})))
        .await
        .unwrap();
    assert_eq!(h.requests.request_edit_manga(manga.id).await.unwrap(), 2);

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.chapters_edited, 2);
    assert_eq!(h.connector.calls_for(h.library.id), 2);

    let new_archive = h.archive("Renamed Series - Vol. 1 Ch. 1.cbz");
    assert!(new_archive.exists());
    assert!(!old_archive.exists());
    assert_eq!(
        list_members(&new_archive).unwrap(),
        ["1.png", "2.png", "ComicInfo.xml"]
    );
    assert_eq!(read_member(&new_archive, "1.png").unwrap(), pages_before);
    let info = String::from_utf8(read_member(&new_archive, "ComicInfo.xml").unwrap()).unwrap();
    assert!(info.contains("<Series>Renamed Series</Series>"));

    let chapters = h.store.chapters_for_manga(manga.id).await.unwrap();
    assert!(chapters.iter().all(|c| c.file.as_ref().is_some_and(|f| f.exists())));
    assert!(h.store.edit_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn edits_without_an_archive_are_dropped() {
    let h = harness().await;
    let manga = h.seeded_manga().await;
    let volume = Volume::new(manga.id, 1.0);
    h.store.save_volume(volume.clone()).await.unwrap();
    let mut chapter = Chapter::new(volume.id, "gone");
    chapter.mark_downloaded(h.archive("gone.cbz"));
    h.store.save_chapter(chapter.clone()).await.unwrap();
    h.requests.request_edit_chapter(chapter.id).await.unwrap();

    let report = h.monitor.sweep().await.unwrap();
    assert_eq!(report.edits_dropped, 1);
    assert!(h.store.edit_jobs().await.unwrap().is_empty());

    let chapter = h.store.chapter(chapter.id).await.unwrap().unwrap();
    assert!(!chapter.downloaded);
    assert!(chapter.file.is_none());
}

#[tokio::test]
async fn a_stopped_monitor_does_no_work() {
    let h = harness().await;
    h.store.get_or_create_manga_job(h.manga_job()).await.unwrap();
    h.ctx.stop.cancel();

    let report = h.monitor.sweep().await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.passes, 0);
    assert_eq!(h.store.manga_jobs().await.unwrap().len(), 1);
    assert_eq!(h.connector.calls_for(h.library.id), 0);
}

#[tokio::test]
async fn spawned_monitor_drains_queued_work() {
    let h = harness().await;
    h.requests
        .request_manga(h.library.id, &h.plugin, args(json!({"url": SERIES_URL})))
        .await
        .unwrap();

    let running = Monitor::new(h.ctx.clone(), Arc::new(Notifier::new())).spawn();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while downloaded_chapters(&h.store).await < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(downloaded_chapters(&h.store).await, 2);
    assert!(running.shutdown(Duration::from_secs(2)).await);
}

async fn downloaded_chapters(store: &InMemoryStore) -> usize {
    let mut count = 0;
    for manga in store.all_manga().await.unwrap() {
        count += store
            .chapters_for_manga(manga.id)
            .await
            .unwrap()
            .iter()
            .filter(|chapter| chapter.downloaded)
            .count();
    }
    count
}
