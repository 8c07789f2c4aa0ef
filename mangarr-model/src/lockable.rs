//! Values that user edits can pin against automated metadata syncs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Result of a single [`LockableField::set_value`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Changed,
    Unchanged,
    /// The field is locked and the write was not forced.
    Locked,
}

impl SetOutcome {
    pub fn changed(self) -> bool {
        matches!(self, SetOutcome::Changed)
    }
}

/// A typed value paired with a lock flag.
///
/// Automated writes pass `force = false` and bounce off a locked field; user
/// edits pass `force = true` and always land.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LockableField<T> {
    pub value: T,
    #[serde(default)]
    pub locked: bool,
}

impl<T: PartialEq> LockableField<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            locked: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn set_value(&mut self, value: T, force: bool) -> SetOutcome {
        if self.locked && !force {
            return SetOutcome::Locked;
        }
        if self.value == value {
            return SetOutcome::Unchanged;
        }
        self.value = value;
        SetOutcome::Changed
    }
}

/// Coercion from loosely typed source data into a field's value type.
pub trait FieldValue: Sized + PartialEq {
    fn from_json(raw: &Value) -> Result<Self, ValidationError>;
}

impl FieldValue for String {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        match raw {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ValidationError::new("string", other)),
        }
    }
}

impl FieldValue for Vec<String> {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        match raw {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(ValidationError::new("list of strings", other)),
                })
                .collect(),
            other => Err(ValidationError::new("list of strings", other)),
        }
    }
}

impl FieldValue for bool {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        match raw {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(ValidationError::new("boolean", raw)),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ValidationError::new("boolean", raw)),
            },
            other => Err(ValidationError::new("boolean", other)),
        }
    }
}

impl FieldValue for u32 {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        let parsed = match raw {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        parsed
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ValidationError::new("unsigned integer", raw))
    }
}

impl FieldValue for f64 {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        let parsed = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed
            .filter(|f| f.is_finite())
            .ok_or_else(|| ValidationError::new("number", raw))
    }
}

impl FieldValue for Option<DateTime<Utc>> {
    fn from_json(raw: &Value) -> Result<Self, ValidationError> {
        match raw {
            Value::Null => Ok(None),
            Value::String(s) => parse_datetime(s)
                .map(Some)
                .ok_or_else(|| ValidationError::new("datetime", raw)),
            other => Err(ValidationError::new("datetime", other)),
        }
    }
}

/// Accepts RFC 3339 stamps as well as naive dates and datetimes (read as UTC).
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Object-safe view of a lockable field used by the merge tables.
pub trait MergeField {
    fn merge_json(
        &mut self,
        raw: &Value,
        force: bool,
    ) -> Result<SetOutcome, ValidationError>;

    fn set_locked(&mut self, locked: bool);
}

impl<T: FieldValue> MergeField for LockableField<T> {
    fn merge_json(
        &mut self,
        raw: &Value,
        force: bool,
    ) -> Result<SetOutcome, ValidationError> {
        let value = T::from_json(raw)?;
        Ok(self.set_value(value, force))
    }

    fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}
