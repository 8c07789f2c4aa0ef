//! Durable pending-work records.
//!
//! A job's presence in the store is the queue: success deletes it, failure
//! stamps `last_run` so it becomes due again after the retry window.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mangarr_model::{Arguments, ChapterId, JobId, LibraryId, MangaId};
use serde::{Deserialize, Serialize};

/// Job family, used for log fields and progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    MonitorManga,
    MonitorChapter,
    EditChapter,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MonitorManga => "monitor_manga",
            JobKind::MonitorChapter => "monitor_chapter",
            JobKind::EditChapter => "edit_chapter",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when a job that last ran at `last_run` may run again at `now`. A
/// window too large to represent never comes due.
pub fn is_due(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    retry_window: Duration,
) -> bool {
    match last_run {
        None => true,
        Some(at) => match chrono::Duration::from_std(retry_window) {
            Ok(window) => at.checked_add_signed(window).is_some_and(|due| due < now),
            Err(_) => false,
        },
    }
}

/// Re-synchronizes one series against its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMangaJob {
    pub id: JobId,
    pub library_id: LibraryId,
    pub plugin: String,
    pub url: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manga_id: Option<MangaId>,
    pub created_at: DateTime<Utc>,
}

impl MonitorMangaJob {
    pub fn new(
        library_id: LibraryId,
        plugin: impl Into<String>,
        url: impl Into<String>,
        arguments: Arguments,
    ) -> Self {
        Self {
            id: JobId::new(),
            library_id,
            plugin: plugin.into(),
            url: url.into(),
            arguments,
            last_run: None,
            manga_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_manga(mut self, manga_id: MangaId) -> Self {
        self.manga_id = Some(manga_id);
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>, retry_window: Duration) -> bool {
        is_due(self.last_run, now, retry_window)
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
    }
}

/// Downloads one chapter of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorChapterJob {
    pub id: JobId,
    pub manga_id: MangaId,
    pub plugin: String,
    pub url: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MonitorChapterJob {
    pub fn new(
        manga_id: MangaId,
        plugin: impl Into<String>,
        url: impl Into<String>,
        arguments: Arguments,
    ) -> Self {
        Self {
            id: JobId::new(),
            manga_id,
            plugin: plugin.into(),
            url: url.into(),
            arguments,
            last_run: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, retry_window: Duration) -> bool {
        is_due(self.last_run, now, retry_window)
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
    }
}

/// Rewrites the metadata of an already packaged chapter. Always due.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditChapterJob {
    pub id: JobId,
    pub chapter_id: ChapterId,
    pub created_at: DateTime<Utc>,
}

impl EditChapterJob {
    pub fn new(chapter_id: ChapterId) -> Self {
        Self {
            id: JobId::new(),
            chapter_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn fresh_jobs_are_due() {
        let job = MonitorMangaJob::new(
            LibraryId::new(),
            "manga_example",
            "u",
            Arguments::new(),
        );
        assert!(job.is_due(Utc::now(), HOUR));
    }

    #[test]
    fn failed_jobs_wait_out_the_retry_window() {
        let now = Utc::now();
        let mut job = MonitorChapterJob::new(
            MangaId::new(),
            "manga_example",
            "u",
            Arguments::new(),
        );
        job.mark_failed(now);

        assert!(!job.is_due(now, HOUR));
        assert!(!job.is_due(now + chrono::Duration::minutes(59), HOUR));
        assert!(job.is_due(now + chrono::Duration::minutes(61), HOUR));
    }

    #[test]
    fn huge_retry_windows_never_come_due() {
        let now = Utc::now();
        let last_run = Some(now - chrono::Duration::days(1));
        let forever = Duration::from_millis(u64::MAX);
        assert!(!is_due(last_run, now, forever));
        assert!(!is_due(last_run, now, Duration::from_secs(i64::MAX as u64 / 1000)));
        assert!(is_due(None, now, forever));
    }
}
