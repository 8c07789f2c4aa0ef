//! The three job runners.
//!
//! Each runner takes ownership of a job, does its work, and settles the job
//! in the store: deleted on success, stamped and kept on transient failure.
//! Plugin, archive and filesystem failures stay inside the runner and
//! surface as an outcome; only store errors while settling propagate.

mod chapter;
mod context;
mod edit;
mod manga;

pub use chapter::{ChapterOutcome, run_chapter_job};
pub use context::PipelineContext;
pub use edit::{EditOutcome, run_edit_job};
pub use manga::{MangaOutcome, run_manga_job};

use std::path::PathBuf;

use mangarr_model::{Arguments, Chapter, Manga, Volume};
use serde_json::Value;

use crate::archive::naming::{chapter_file_name, unique_chapter_file_name};
use crate::error::Result;

/// Reads a numeric key from a plugin entry. Numeric strings are accepted;
/// anything else, including `NaN` and infinities, yields `default`.
pub(crate) fn entry_number(entry: &Arguments, key: &str, default: f64) -> f64 {
    let number = match entry.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite()).unwrap_or(default)
}

/// Where `chapter`'s archive belongs in the series folder. Falls back to a
/// url-qualified name when another chapter of the series already owns the
/// plain one.
pub(crate) async fn chapter_destination(
    ctx: &PipelineContext,
    manga: &Manga,
    volume: &Volume,
    chapter: &Chapter,
) -> Result<PathBuf> {
    let (volume_number, chapter_number) = (*volume.number.value(), *chapter.number.value());
    let plain = manga.folder.join(chapter_file_name(
        manga.name.value(),
        volume_number,
        chapter_number,
    ));
    let taken = ctx
        .store
        .chapters_for_manga(manga.id)
        .await?
        .iter()
        .any(|other| other.id != chapter.id && other.file.as_deref() == Some(plain.as_path()));
    if !taken {
        return Ok(plain);
    }
    Ok(manga.folder.join(unique_chapter_file_name(
        manga.name.value(),
        volume_number,
        chapter_number,
        &chapter.url,
    )))
}

pub(crate) async fn publish_backlog(ctx: &PipelineContext) {
    if let Err(err) = ctx.refresh_backlog().await {
        tracing::warn!(target: "monitor::sweep", error = %err, "failed to refresh backlog counters");
    }
}
