use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::{Arguments, FieldKey, MergeReport, Mergeable, merge_fields};
use crate::ids::{LibraryId, MangaId};
use crate::lockable::{LockableField, MergeField};

/// A tracked series, keyed by its source url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manga {
    pub id: MangaId,
    pub library_id: LibraryId,
    /// Registry key of the source plugin; bound once at creation.
    pub plugin: String,
    pub url: String,
    pub folder: PathBuf,
    pub date_added: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub name: LockableField<String>,
    pub localized_name: LockableField<String>,
    pub description: LockableField<String>,
    pub genres: LockableField<Vec<String>>,
    pub tags: LockableField<Vec<String>>,
    pub complete: LockableField<bool>,
    #[serde(default)]
    pub alt_names: Vec<String>,
    #[serde(default)]
    pub arguments: Arguments,
}

impl Manga {
    pub fn new(
        library_id: LibraryId,
        plugin: impl Into<String>,
        url: impl Into<String>,
        folder: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MangaId::new(),
            library_id,
            plugin: plugin.into(),
            url: url.into(),
            folder: folder.into(),
            date_added: now,
            last_update: now,
            name: LockableField::default(),
            localized_name: LockableField::default(),
            description: LockableField::default(),
            genres: LockableField::default(),
            tags: LockableField::default(),
            complete: LockableField::default(),
            alt_names: Vec::new(),
            arguments: Arguments::new(),
        }
    }

    /// Merges metadata into the lockable fields and appends unseen
    /// `alt_names`.
    pub fn update_fields(&mut self, patch: &Arguments, force: bool) -> MergeReport {
        let mut report = merge_fields(self, patch, force);
        if let Some(Value::Array(names)) = patch.get("alt_names") {
            for name in names.iter().filter_map(Value::as_str) {
                if !self.alt_names.iter().any(|known| known == name) {
                    self.alt_names.push(name.to_string());
                    report.changed.push("alt_names");
                }
            }
        }
        report
    }

    pub fn is_stale(&self, threshold: DateTime<Utc>) -> bool {
        self.last_update < threshold
    }
}

impl Mergeable for Manga {
    const FIELDS: &'static [FieldKey] = &[
        FieldKey::new("name", "name_lock"),
        FieldKey::new("localized_name", "localized_name_lock"),
        FieldKey::new("description", "description_lock"),
        FieldKey::new("genres", "genres_lock"),
        FieldKey::new("tags", "tags_lock"),
        FieldKey::new("complete", "complete_lock"),
    ];

    fn field_mut(&mut self, key: &str) -> Option<&mut dyn MergeField> {
        match key {
            "name" => Some(&mut self.name),
            "localized_name" => Some(&mut self.localized_name),
            "description" => Some(&mut self.description),
            "genres" => Some(&mut self.genres),
            "tags" => Some(&mut self.tags),
            "complete" => Some(&mut self.complete),
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
    use serde_json::json;

    fn patch(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn manga() -> Manga {
        Manga::new(LibraryId::new(), "manga_example", "https://x/m/1", "/tmp")
    }

    #[test]
    fn sync_does_not_override_locked_fields() {
        let mut manga = manga();
        manga.update_fields(
            &patch(json!({"name": "Mine", "name_lock": true})),
            true,
        );

        let report = manga.update_fields(
            &patch(json!({"name": "Remote", "genres": ["Action", "Drama"]})),
            false,
        );

        assert_eq!(manga.name.value, "Mine");
        assert_eq!(manga.genres.value, vec!["Action", "Drama"]);
        assert_eq!(report.locked, vec!["name"]);
        assert_eq!(report.changed, vec!["genres"]);
    }

    #[test]
    fn invalid_values_are_skipped_but_merge_continues() {
        let mut manga = manga();
        let report = manga.update_fields(
            &patch(json!({
                "complete": {"nope": true},
                "description": "About",
                "extra": 5
            })),
            false,
        );

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "complete");
        assert!(!manga.complete.value);
        assert_eq!(manga.description.value, "About");
        assert_eq!(manga.arguments.get("extra"), Some(&json!(5)));
    }

    #[test]
    fn alt_names_accumulate_without_duplicates() {
        let mut manga = manga();
        manga.update_fields(&patch(json!({"alt_names": ["A", "B"]})), false);
        manga.update_fields(&patch(json!({"alt_names": ["B", "C"]})), false);
        assert_eq!(manga.alt_names, vec!["A", "B", "C"]);
    }

    #[test]
    fn unlock_key_releases_the_field() {
        let mut manga = manga();
        manga.name.lock();
        manga.update_fields(
            &patch(json!({"name": "Remote", "name_lock": false})),
            false,
        );
        // Values apply before lock toggles within the same key.
        assert_eq!(manga.name.value, "");
        assert!(!manga.name.locked);

        manga.update_fields(&patch(json!({"name": "Remote"})), false);
        assert_eq!(manga.name.value, "Remote");
    }
}
