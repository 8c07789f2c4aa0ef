use serde::{Deserialize, Serialize};

use crate::fields::{Arguments, FieldKey, MergeReport, Mergeable, merge_fields};
use crate::ids::{MangaId, VolumeId};
use crate::lockable::{LockableField, MergeField};
use crate::numbers::same_number;

/// A numbered grouping of chapters within a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub manga_id: MangaId,
    pub name: LockableField<String>,
    pub description: LockableField<String>,
    pub number: LockableField<f64>,
    #[serde(default)]
    pub arguments: Arguments,
}

/// Number given to volumes created from a non-finite number.
pub const DEFAULT_VOLUME_NUMBER: f64 = 1.0;

impl Volume {
    pub fn new(manga_id: MangaId, number: f64) -> Self {
        let number = if number.is_finite() {
            number
        } else {
            DEFAULT_VOLUME_NUMBER
        };
        Self {
            id: VolumeId::new(),
            manga_id,
            name: LockableField::default(),
            description: LockableField::default(),
            number: LockableField::new(number),
            arguments: Arguments::new(),
        }
    }

    pub fn update_fields(&mut self, patch: &Arguments, force: bool) -> MergeReport {
        merge_fields(self, patch, force)
    }

    /// `3` and `3.0` name the same volume.
    pub fn has_number(&self, number: f64) -> bool {
        same_number(self.number.value, number)
    }
}

impl Mergeable for Volume {
    const FIELDS: &'static [FieldKey] = &[
        FieldKey::new("name", "name_lock"),
        FieldKey::new("description", "description_lock"),
        FieldKey::new("volume_number", "volume_number_lock"),
    ];

    fn field_mut(&mut self, key: &str) -> Option<&mut dyn MergeField> {
        match key {
            "name" => Some(&mut self.name),
            "description" => Some(&mut self.description),
            "volume_number" => Some(&mut self.number),
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

    #[test]
    fn volume_number_maps_onto_number() {
        let mut volume = Volume::new(MangaId::new(), 1.0);
        let patch = json!({"volume_number": "2.5"});
        volume.update_fields(patch.as_object().unwrap(), false);
        assert_eq!(volume.number.value, 2.5);
        assert!(volume.has_number(2.5));
        assert!(!volume.has_number(2.0));
    }

    #[test]
    fn integer_and_float_numbers_match() {
        let volume = Volume::new(MangaId::new(), 3.0);
        let as_int = json!(3).as_f64().unwrap();
        assert!(volume.has_number(as_int));
    }

    #[test]
    fn non_finite_numbers_fall_back_to_the_first_volume() {
        for number in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let volume = Volume::new(MangaId::new(), number);
            assert_eq!(volume.number.value, DEFAULT_VOLUME_NUMBER);
            let json = serde_json::to_string(&volume).unwrap();
            let reread: Volume = serde_json::from_str(&json).unwrap();
            assert_eq!(reread, volume);
        }
    }
}
