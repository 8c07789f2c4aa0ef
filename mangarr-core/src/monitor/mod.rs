//! Reconciliation loop.
//!
//! The monitor alternates between idle and sweeping. A sweep repeats its
//! passes until no due work is left, then notifies every library it touched
//! exactly once and schedules the next sweep.

mod config;

pub use config::MonitorConfig;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mangarr_model::{ChapterId, JobId, LibraryId, MangaId};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::archive::clear_directory;
use crate::error::Result;
use crate::jobs::MonitorMangaJob;
use crate::notify::Notifier;
use crate::pipeline::{
    ChapterOutcome, EditOutcome, MangaOutcome, PipelineContext, publish_backlog,
    run_chapter_job, run_edit_job, run_manga_job,
};

/// Counters for one completed (or aborted) sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub passes: usize,
    pub promoted: usize,
    pub manga_synced: usize,
    pub manga_failed: usize,
    pub chapters_downloaded: usize,
    pub chapters_deferred: usize,
    pub chapters_edited: usize,
    pub edits_dropped: usize,
    pub libraries_notified: usize,
    pub cancelled: bool,
}

struct MonitorShared {
    wake: Notify,
    sweeping: AtomicBool,
    paused: AtomicBool,
    stop: CancellationToken,
}

/// Drives the pipeline. Run it with [`Monitor::spawn`] and control it
/// through the returned [`MonitorHandle`].
pub struct Monitor {
    ctx: PipelineContext,
    notifier: Arc<Notifier>,
    shared: Arc<MonitorShared>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("ctx", &self.ctx)
            .field("notifier", &self.notifier)
            .field("sweeping", &self.shared.sweeping.load(Ordering::Relaxed))
            .field("paused", &self.shared.paused.load(Ordering::Relaxed))
            .finish()
    }
}

impl Monitor {
    pub fn new(ctx: PipelineContext, notifier: Arc<Notifier>) -> Self {
        let shared = Arc::new(MonitorShared {
            wake: Notify::new(),
            sweeping: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop: ctx.stop.clone(),
        });
        Self {
            ctx,
            notifier,
            shared,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// A control handle that is not attached to a running loop; useful when
    /// driving [`sweep`](Self::sweep) by hand.
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: self.shared.clone(),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the loop on the runtime.
    pub fn spawn(self) -> MonitorHandle {
        let shared = self.shared.clone();
        let task = tokio::spawn(self.run());
        MonitorHandle {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Waits for plugins to load, then loops until stopped.
    pub async fn run(self) {
        tokio::select! {
            _ = self.shared.stop.cancelled() => return,
            _ = self.ctx.plugins.wait_loaded() => {}
        }
        tracing::info!(target: "monitor::sweep", "monitor started");

        // `None` once the interval is too large to schedule; only triggers
        // start a sweep then.
        let mut next_run = Some(Instant::now());
        let mut woken = false;
        loop {
            if self.shared.stop.is_cancelled() {
                break;
            }
            if woken || next_run.is_some_and(|at| Instant::now() >= at) {
                self.shared.sweeping.store(true, Ordering::Release);
                match self.sweep().await {
                    Ok(report) if report.passes > 0 => {
                        tracing::info!(target: "monitor::sweep", report = ?report, "sweep finished");
                    }
                    Ok(_) => {
                        tracing::debug!(target: "monitor::sweep", "nothing to do");
                    }
                    Err(err) => {
                        tracing::error!(target: "monitor::sweep", error = %err, "sweep aborted");
                    }
                }
                self.shared.sweeping.store(false, Ordering::Release);
                next_run = Instant::now().checked_add(self.ctx.config.sweep_interval());
            }

            woken = tokio::select! {
                _ = self.shared.stop.cancelled() => break,
                _ = self.shared.wake.notified() => true,
                _ = tokio::time::sleep(self.ctx.config.poll_interval()) => false,
            };
        }
        tracing::info!(target: "monitor::sweep", "monitor stopped");
    }

    /// Runs passes until no due work remains, then flushes notifications.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut touched = HashSet::new();
        let result = self.drain_due_work(&mut report, &mut touched).await;

        if self.ctx.is_stopped() {
            report.cancelled = true;
        } else {
            report.libraries_notified = self.flush_notifications(&touched).await?;
        }
        result.map(|()| report)
    }

    async fn drain_due_work(
        &self,
        report: &mut SweepReport,
        touched: &mut HashSet<LibraryId>,
    ) -> Result<()> {
        // Jobs that failed once are not retried within the same sweep.
        let mut deferred = HashSet::new();
        loop {
            if self.ctx.is_stopped() || !self.has_due_work(&deferred).await? {
                return Ok(());
            }
            report.passes += 1;
            tracing::debug!(target: "monitor::sweep", pass = report.passes, "starting pass");

            match clear_directory(&self.ctx.cache_dir).await {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(target: "monitor::sweep", removed, "cache cleared");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(target: "monitor::sweep", error = %err, "failed to clear cache");
                }
            }

            self.promote_stale(report, touched).await?;
            self.run_manga_jobs(report, touched, &mut deferred).await?;
            self.run_chapter_jobs(report, touched, &mut deferred).await?;
            self.run_edit_jobs(report, touched, &mut deferred).await?;
        }
    }

    fn stale_threshold(&self) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.ctx.config.staleness_window()).ok()?;
        Utc::now().checked_sub_signed(window)
    }

    fn downloads_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    async fn has_due_work(&self, deferred: &HashSet<JobId>) -> Result<bool> {
        let now = Utc::now();
        let retry = self.ctx.config.retry_window();
        let store = &self.ctx.store;

        if let Some(threshold) = self.stale_threshold() {
            for manga in store.stale_manga(threshold).await? {
                // A stale series with a pending job waits on that job.
                if store.manga_job_by_key(manga.library_id, &manga.url).await?.is_none() {
                    return Ok(true);
                }
            }
        }
        if store
            .manga_jobs()
            .await?
            .iter()
            .any(|job| job.is_due(now, retry) && !deferred.contains(&job.id))
        {
            return Ok(true);
        }
        if !self.downloads_paused()
            && store
                .chapter_jobs()
                .await?
                .iter()
                .any(|job| job.is_due(now, retry) && !deferred.contains(&job.id))
        {
            return Ok(true);
        }
        Ok(store
            .edit_jobs()
            .await?
            .iter()
            .any(|job| !deferred.contains(&job.id)))
    }

    async fn promote_stale(
        &self,
        report: &mut SweepReport,
        touched: &mut HashSet<LibraryId>,
    ) -> Result<()> {
        let Some(threshold) = self.stale_threshold() else {
            return Ok(());
        };
        for manga in self.ctx.store.stale_manga(threshold).await? {
            let mut arguments = manga.arguments.clone();
            arguments.insert("url".into(), Value::String(manga.url.clone()));
            let candidate =
                MonitorMangaJob::new(manga.library_id, manga.plugin.clone(), manga.url.clone(), arguments)
                    .with_manga(manga.id);
            let (_, created) = self.ctx.store.get_or_create_manga_job(candidate).await?;
            if created {
                report.promoted += 1;
                touched.insert(manga.library_id);
                tracing::debug!(target: "monitor::sweep", url = %manga.url, "stale series queued");
            }
        }
        if report.promoted > 0 {
            publish_backlog(&self.ctx).await;
        }
        Ok(())
    }

    async fn run_manga_jobs(
        &self,
        report: &mut SweepReport,
        touched: &mut HashSet<LibraryId>,
        deferred: &mut HashSet<JobId>,
    ) -> Result<()> {
        let now = Utc::now();
        let retry = self.ctx.config.retry_window();
        for job in self.ctx.store.manga_jobs().await? {
            if self.ctx.is_stopped() {
                return Ok(());
            }
            if !job.is_due(now, retry) || deferred.contains(&job.id) {
                continue;
            }
            let job_id = job.id;
            let library_id = job.library_id;
            match run_manga_job(&self.ctx, job).await? {
                MangaOutcome::Synced { .. } => {
                    report.manga_synced += 1;
                    touched.insert(library_id);
                }
                MangaOutcome::Failed(_) => {
                    report.manga_failed += 1;
                    deferred.insert(job_id);
                }
            }
        }
        Ok(())
    }

    async fn run_chapter_jobs(
        &self,
        report: &mut SweepReport,
        touched: &mut HashSet<LibraryId>,
        deferred: &mut HashSet<JobId>,
    ) -> Result<()> {
        if self.downloads_paused() {
            tracing::debug!(target: "monitor::sweep", "downloads paused, skipping chapter jobs");
            return Ok(());
        }
        let now = Utc::now();
        let retry = self.ctx.config.retry_window();
        let mut libraries: HashMap<MangaId, Option<LibraryId>> = HashMap::new();
        for job in self.ctx.store.chapter_jobs().await? {
            if self.ctx.is_stopped() {
                return Ok(());
            }
            if !job.is_due(now, retry) || deferred.contains(&job.id) {
                continue;
            }
            let job_id = job.id;
            let manga_id = job.manga_id;
            let outcome = run_chapter_job(&self.ctx, job).await?;
            if outcome.touches_library() {
                report.chapters_downloaded += 1;
                let library_id = match libraries.get(&manga_id) {
                    Some(library_id) => *library_id,
                    None => {
                        let library_id =
                            self.ctx.store.manga(manga_id).await?.map(|manga| manga.library_id);
                        libraries.insert(manga_id, library_id);
                        library_id
                    }
                };
                touched.extend(library_id);
            } else if outcome != ChapterOutcome::Cancelled {
                report.chapters_deferred += 1;
                deferred.insert(job_id);
            }
        }
        Ok(())
    }

    async fn run_edit_jobs(
        &self,
        report: &mut SweepReport,
        touched: &mut HashSet<LibraryId>,
        deferred: &mut HashSet<JobId>,
    ) -> Result<()> {
        for job in self.ctx.store.edit_jobs().await? {
            if self.ctx.is_stopped() {
                return Ok(());
            }
            if deferred.contains(&job.id) {
                continue;
            }
            let job_id = job.id;
            let chapter_id = job.chapter_id;
            match run_edit_job(&self.ctx, job).await? {
                EditOutcome::Repackaged { .. } => {
                    report.chapters_edited += 1;
                    touched.extend(self.library_of_chapter(chapter_id).await?);
                }
                EditOutcome::MissingSource => report.edits_dropped += 1,
                EditOutcome::Failed(_) | EditOutcome::Cancelled => {
                    deferred.insert(job_id);
                }
            }
        }
        Ok(())
    }

    async fn library_of_chapter(&self, chapter_id: ChapterId) -> Result<Option<LibraryId>> {
        let store = &self.ctx.store;
        let Some(chapter) = store.chapter(chapter_id).await? else {
            return Ok(None);
        };
        let Some(volume) = store.volume(chapter.volume_id).await? else {
            return Ok(None);
        };
        Ok(store.manga(volume.manga_id).await?.map(|manga| manga.library_id))
    }

    async fn flush_notifications(&self, touched: &HashSet<LibraryId>) -> Result<usize> {
        let mut notified = 0;
        for library_id in touched {
            match self.ctx.store.library(*library_id).await? {
                Some(library) => {
                    self.notifier.notify(&library).await;
                    notified += 1;
                }
                None => {
                    tracing::warn!(
                        target: "monitor::notify",
                        library = %library_id,
                        "touched library no longer exists"
                    );
                }
            }
        }
        Ok(notified)
    }
}

/// Process-wide control surface of a [`Monitor`].
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<MonitorShared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("sweeping", &self.is_sweeping())
            .field("paused", &self.is_download_paused())
            .field("stopped", &self.shared.stop.is_cancelled())
            .finish()
    }
}

impl MonitorHandle {
    /// Wakes an idle monitor. Returns false, doing nothing, while a sweep is
    /// running; that sweep picks up new work before it finishes.
    pub fn trigger(&self) -> bool {
        if self.is_sweeping() {
            return false;
        }
        self.shared.wake.notify_one();
        true
    }

    pub fn is_sweeping(&self) -> bool {
        self.shared.sweeping.load(Ordering::Acquire)
    }

    /// Flips the download pause and returns the new state.
    pub fn toggle_download_pause(&self) -> bool {
        let paused = !self.shared.paused.fetch_xor(true, Ordering::AcqRel);
        tracing::info!(target: "monitor::sweep", paused, "download pause toggled");
        paused
    }

    pub fn is_download_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.shared.stop.clone()
    }

    /// Requests a stop and waits up to `grace` for the loop to exit. Returns
    /// false when the loop had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shared.stop.cancel();
        let Some(mut task) = self.task.lock().await.take() else {
            return true;
        };
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::error!(target: "monitor::sweep", error = %err, "monitor task failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    target: "monitor::sweep",
                    grace_ms = grace.as_millis() as u64,
                    "monitor did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginRegistry;
    use crate::progress::ProgressHub;
    use crate::store::InMemoryStore;

    fn monitor() -> (Monitor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PluginRegistry::default()),
            ProgressHub::new(),
            dir.path().join("cache"),
            MonitorConfig::immediate(),
        );
        (Monitor::new(ctx, Arc::new(Notifier::new())), dir)
    }

    #[test]
    fn pause_toggles() {
        let (monitor, _dir) = monitor();
        let handle = monitor.handle();
        assert!(!handle.is_download_paused());
        assert!(handle.toggle_download_pause());
        assert!(handle.is_download_paused());
        assert!(!handle.toggle_download_pause());
    }

    #[test]
    fn trigger_is_a_no_op_while_sweeping() {
        let (monitor, _dir) = monitor();
        let handle = monitor.handle();
        monitor.shared.sweeping.store(true, Ordering::Release);
        assert!(!handle.trigger());
        monitor.shared.sweeping.store(false, Ordering::Release);
        assert!(handle.trigger());
    }

    #[tokio::test]
    async fn idle_triggers_coalesce_into_one_wake() {
        let (monitor, _dir) = monitor();
        let handle = monitor.handle();
        assert!(handle.trigger());
        assert!(handle.trigger());

        monitor.shared.wake.notified().await;
        let second = tokio::time::timeout(Duration::from_millis(50), monitor.shared.wake.notified());
        assert!(second.await.is_err());
    }

    #[tokio::test]
    async fn empty_store_sweeps_without_passes() {
        let (monitor, _dir) = monitor();
        let report = monitor.sweep().await.unwrap();
        assert_eq!(report.passes, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn shutdown_stops_a_loop_waiting_for_plugins() {
        let (monitor, _dir) = monitor();
        let handle = monitor.spawn();
        assert!(handle.shutdown(Duration::from_secs(1)).await);
        assert!(handle.stop_token().is_cancelled());
    }

    #[tokio::test]
    async fn unschedulable_sweep_interval_keeps_the_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let plugins = Arc::new(PluginRegistry::default());
        plugins.mark_loaded();
        let config = MonitorConfig {
            sweep_interval_ms: u64::MAX,
            ..MonitorConfig::immediate()
        };
        let ctx = PipelineContext::new(
            Arc::new(InMemoryStore::new()),
            plugins,
            ProgressHub::new(),
            dir.path().join("cache"),
            config,
        );
        let handle = Monitor::new(ctx, Arc::new(Notifier::new())).spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.trigger());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }
}
