use thiserror::Error;

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("field `{key}` rejected: {source}")]
    Field {
        key: &'static str,
        #[source]
        source: ValidationError,
    },
}

/// A raw value could not be coerced into the field's type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, got {found}")]
pub struct ValidationError {
    pub expected: &'static str,
    pub found: String,
}

impl ValidationError {
    pub fn new(expected: &'static str, found: &serde_json::Value) -> Self {
        let mut found = found.to_string();
        if found.len() > 64 {
            let mut cut = 64;
            while !found.is_char_boundary(cut) {
                cut -= 1;
            }
            found.truncate(cut);
            found.push_str("...");
        }
        Self { expected, found }
    }
}

/// A single rejected key from a field merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub key: &'static str,
    pub error: ValidationError,
}

impl From<FieldError> for ModelError {
    fn from(err: FieldError) -> Self {
        ModelError::Field {
            key: err.key,
            source: err.error,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
