//! File and folder names derived from records.

use std::path::{Path, PathBuf};

use mangarr_model::format_number;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

const MAX_FILENAME_BYTES: usize = 255;

static INVALID_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[<>:"/\\|?*\n\r\t]"#)
        .expect("invalid filename regex should compile")
});

pub fn sha256_hex(input: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(input.as_ref()))
}

/// Replaces characters that are invalid on common filesystems, trims
/// surrounding whitespace and dots, and caps the length at 255 bytes while
/// keeping a short extension intact.
pub fn make_valid_filename(name: &str) -> String {
    let replaced = INVALID_FILENAME_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        return "_".to_string();
    }
    if trimmed.len() <= MAX_FILENAME_BYTES {
        return trimmed.to_string();
    }

    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && ext.len() <= 8 => {
            let budget = MAX_FILENAME_BYTES - ext.len() - 1;
            format!("{}.{ext}", truncate_bytes(stem, budget))
        }
        _ => truncate_bytes(trimmed, MAX_FILENAME_BYTES).to_string(),
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// `<library>/<sha256(url)>`; stable for the life of the series.
pub fn manga_folder(library_folder: &Path, url: &str) -> PathBuf {
    library_folder.join(make_valid_filename(&sha256_hex(url)))
}

/// `"{series} - Vol. {volume} Ch. {chapter}.cbz"`, sanitized.
pub fn chapter_file_name(manga_name: &str, volume: f64, chapter: f64) -> String {
    make_valid_filename(&format!(
        "{manga_name} - Vol. {} Ch. {}.cbz",
        format_number(volume),
        format_number(chapter)
    ))
}

/// [`chapter_file_name`] with a short digest of the chapter url, for
/// chapters whose numbers collide with one already on disk.
pub fn unique_chapter_file_name(
    manga_name: &str,
    volume: f64,
    chapter: f64,
    chapter_url: &str,
) -> String {
    let digest = sha256_hex(chapter_url);
    make_valid_filename(&format!(
        "{manga_name} - Vol. {} Ch. {} [{}].cbz",
        format_number(volume),
        format_number(chapter),
        &digest[..8]
    ))
}

/// Staging archive for a download, unique per plugin, series and chapter.
pub fn cache_archive_path(
    cache: &Path,
    plugin: &str,
    manga_name: &str,
    chapter_url: &str,
) -> PathBuf {
    let digest = sha256_hex(format!("{plugin} {manga_name} {chapter_url}"));
    cache.join(format!("{digest}.cbz"))
}

/// Scratch directory used while repackaging a chapter.
pub fn edit_workdir(cache: &Path, chapter_url: &str) -> PathBuf {
    cache.join(sha256_hex(chapter_url))
}

/// 1-based page member name padded to the width of `total`.
pub fn page_name(index: usize, total: usize) -> String {
    let width = total.max(1).to_string().len();
    format!("{:0width$}.png", index + 1)
}
