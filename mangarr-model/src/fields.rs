//! Table-driven merge of loosely typed metadata into lockable fields.

use serde_json::{Map, Value};

use crate::error::FieldError;
use crate::lockable::{MergeField, SetOutcome};

/// Free-form key/value bag carried by records and jobs.
pub type Arguments = Map<String, Value>;

/// One entry of a record's merge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldKey {
    /// Key read from incoming metadata.
    pub key: &'static str,
    /// Boolean key toggling the lock on the same field.
    pub lock_key: &'static str,
}

impl FieldKey {
    pub const fn new(key: &'static str, lock_key: &'static str) -> Self {
        Self { key, lock_key }
    }
}

/// Records whose metadata is updated through [`merge_fields`].
pub trait Mergeable {
    /// Static table of mergeable keys, in application order.
    const FIELDS: &'static [FieldKey];

    /// Resolves a table key to its field.
    fn field_mut(&mut self, key: &str) -> Option<&mut dyn MergeField>;

    fn arguments_mut(&mut self) -> &mut Arguments;
}

/// What a merge did to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub changed: Vec<&'static str>,
    pub locked: Vec<&'static str>,
    pub lock_toggles: Vec<&'static str>,
    pub errors: Vec<FieldError>,
}

impl MergeReport {
    /// True when any field value or lock flag moved.
    pub fn is_modified(&self) -> bool {
        !self.changed.is_empty() || !self.lock_toggles.is_empty()
    }
}

/// Applies `patch` to `record`.
///
/// Present non-null keys are coerced and written with `force`; `<key>_lock`
/// booleans flip the lock regardless of `force`. A key that fails coercion is
/// recorded and skipped. The whole patch is then shallow-merged into the
/// record's argument bag.
pub fn merge_fields<R: Mergeable>(
    record: &mut R,
    patch: &Arguments,
    force: bool,
) -> MergeReport {
    let mut report = MergeReport::default();

    for field in R::FIELDS {
        if let Some(raw) = patch.get(field.key).filter(|raw| !raw.is_null())
            && let Some(target) = record.field_mut(field.key)
        {
            match target.merge_json(raw, force) {
                Ok(SetOutcome::Changed) => report.changed.push(field.key),
                Ok(SetOutcome::Locked) => report.locked.push(field.key),
                Ok(SetOutcome::Unchanged) => {}
                Err(error) => report.errors.push(FieldError {
                    key: field.key,
                    error,
                }),
            }
        }

        if let Some(Value::Bool(locked)) = patch.get(field.lock_key)
            && let Some(target) = record.field_mut(field.key)
        {
            target.set_locked(*locked);
            report.lock_toggles.push(field.lock_key);
        }
    }

    merge_arguments(record.arguments_mut(), patch);
    report
}

/// Shallow merge, last writer wins per top-level key.
pub fn merge_arguments(target: &mut Arguments, patch: &Arguments) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Unions two bags without mutating either.
pub fn union_arguments(base: &Arguments, overlay: &Arguments) -> Arguments {
    let mut merged = base.clone();
    merge_arguments(&mut merged, overlay);
    merged
}
