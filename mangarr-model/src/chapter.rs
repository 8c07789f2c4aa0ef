use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::comic::{AgeRating, Format};
use crate::fields::{Arguments, FieldKey, MergeReport, Mergeable, merge_fields};
use crate::ids::{ChapterId, VolumeId};
use crate::lockable::{LockableField, MergeField};

/// A single downloadable unit; packaged as one archive on disk.
///
/// `downloaded == true` implies `file` points at an existing archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub volume_id: VolumeId,
    pub url: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub downloaded: bool,

    pub name: LockableField<String>,
    pub description: LockableField<String>,
    pub localization: LockableField<String>,
    pub publisher: LockableField<Vec<String>>,
    pub imprint: LockableField<Vec<String>>,
    pub release_date: LockableField<Option<DateTime<Utc>>>,
    pub writer: LockableField<Vec<String>>,
    pub penciller: LockableField<Vec<String>>,
    pub inker: LockableField<Vec<String>>,
    pub colorist: LockableField<Vec<String>>,
    pub letterer: LockableField<Vec<String>>,
    pub cover_artist: LockableField<Vec<String>>,
    pub editor: LockableField<Vec<String>>,
    pub translator: LockableField<Vec<String>>,
    pub page_count: LockableField<u32>,
    pub format: LockableField<Format>,
    pub age_rating: LockableField<AgeRating>,
    pub isbn: LockableField<String>,
    pub number: LockableField<f64>,
    #[serde(default)]
    pub arguments: Arguments,
}

impl Chapter {
    pub fn new(volume_id: VolumeId, url: impl Into<String>) -> Self {
        Self {
            id: ChapterId::new(),
            volume_id,
            url: url.into(),
            source_url: None,
            file: None,
            downloaded: false,
            name: LockableField::default(),
            description: LockableField::default(),
            localization: LockableField::default(),
            publisher: LockableField::default(),
            imprint: LockableField::default(),
            release_date: LockableField::default(),
            writer: LockableField::default(),
            penciller: LockableField::default(),
            inker: LockableField::default(),
            colorist: LockableField::default(),
            letterer: LockableField::default(),
            cover_artist: LockableField::default(),
            editor: LockableField::default(),
            translator: LockableField::default(),
            page_count: LockableField::default(),
            format: LockableField::default(),
            age_rating: LockableField::default(),
            isbn: LockableField::default(),
            number: LockableField::default(),
            arguments: Arguments::new(),
        }
    }

    /// Merges metadata and picks up `source_url` when present.
    pub fn update_fields(&mut self, patch: &Arguments, force: bool) -> MergeReport {
        let report = merge_fields(self, patch, force);
        if let Some(source) = patch.get("source_url").and_then(|v| v.as_str()) {
            self.source_url = Some(source.to_string());
        }
        report
    }

    /// Forces the page count to what the source reported and pins it.
    pub fn pin_page_count(&mut self, pages: usize) {
        let pages = u32::try_from(pages).unwrap_or(u32::MAX);
        self.page_count.set_value(pages, true);
        self.page_count.lock();
    }

    pub fn mark_downloaded(&mut self, file: PathBuf) {
        self.file = Some(file);
        self.downloaded = true;
    }

    /// Forgets a download whose archive is no longer on disk.
    pub fn clear_download(&mut self) {
        self.file = None;
        self.downloaded = false;
    }
}

impl Mergeable for Chapter {
    const FIELDS: &'static [FieldKey] = &[
        FieldKey::new("name", "name_lock"),
        FieldKey::new("description", "description_lock"),
        FieldKey::new("localization", "localization_lock"),
        FieldKey::new("publisher", "publisher_lock"),
        FieldKey::new("imprint", "imprint_lock"),
        FieldKey::new("release_date", "release_date_lock"),
        FieldKey::new("writer", "writer_lock"),
        FieldKey::new("penciller", "penciller_lock"),
        FieldKey::new("inker", "inker_lock"),
        FieldKey::new("colorist", "colorist_lock"),
        FieldKey::new("letterer", "letterer_lock"),
        FieldKey::new("cover_artist", "cover_artist_lock"),
        FieldKey::new("editor", "editor_lock"),
        FieldKey::new("translator", "translator_lock"),
        FieldKey::new("page_count", "page_count_lock"),
        FieldKey::new("format", "format_lock"),
        FieldKey::new("age_rating", "age_rating_lock"),
        FieldKey::new("isbn", "isbn_lock"),
        FieldKey::new("chapter_number", "chapter_number_lock"),
    ];

    fn field_mut(&mut self, key: &str) -> Option<&mut dyn MergeField> {
        match key {
            "name" => Some(&mut self.name),
            "description" => Some(&mut self.description),
            "localization" => Some(&mut self.localization),
            "publisher" => Some(&mut self.publisher),
            "imprint" => Some(&mut self.imprint),
            "release_date" => Some(&mut self.release_date),
            "writer" => Some(&mut self.writer),
            "penciller" => Some(&mut self.penciller),
            "inker" => Some(&mut self.inker),
            "colorist" => Some(&mut self.colorist),
            "letterer" => Some(&mut self.letterer),
            "cover_artist" => Some(&mut self.cover_artist),
            "editor" => Some(&mut self.editor),
            "translator" => Some(&mut self.translator),
            "page_count" => Some(&mut self.page_count),
            "format" => Some(&mut self.format),
            "age_rating" => Some(&mut self.age_rating),
            "isbn" => Some(&mut self.isbn),
            "chapter_number" => Some(&mut self.number),
            _ => None,
        }
    }

    fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.arguments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    #[test]
    fn chapter_metadata_merges_from_source_entry() {
        let mut chapter = Chapter::new(VolumeId::new(), "https://x/c/1");
        let entry = json!({
            "url": "https://x/c/1",
            "source_url": "https://x/read/1",
            "name": "Prologue",
            "chapter_number": 1.5,
            "writer": ["A. Author"],
            "release_date": "2020-02-03T00:00:00Z",
            "format": 8,
            "age_rating": "Teen",
        });

        let report = chapter.update_fields(entry.as_object().unwrap(), false);

        assert!(report.errors.is_empty());
        assert_eq!(chapter.number.value, 1.5);
        assert_eq!(chapter.format.value, Format::OneShot);
        assert_eq!(chapter.age_rating.value, AgeRating::Teen);
        assert_eq!(chapter.release_date.value.unwrap().month(), 2);
        assert_eq!(chapter.source_url.as_deref(), Some("https://x/read/1"));
        assert_eq!(chapter.arguments.get("url"), Some(&json!("https://x/c/1")));
    }

    #[test]
    fn pinned_page_count_survives_sync() {
        let mut chapter = Chapter::new(VolumeId::new(), "u");
        chapter.pin_page_count(12);
        chapter.update_fields(json!({"page_count": 3}).as_object().unwrap(), false);
        assert_eq!(chapter.page_count.value, 12);
        assert!(chapter.page_count.locked);
    }

    #[test]
    fn cleared_download_drops_the_file() {
        let mut chapter = Chapter::new(VolumeId::new(), "u");
        chapter.mark_downloaded(PathBuf::from("/lib/a.cbz"));
        chapter.clear_download();
        assert!(!chapter.downloaded);
        assert!(chapter.file.is_none());
    }
}
