use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::LibraryId;

/// A named root folder that owns a set of tracked series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub folder: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Library {
    pub fn new(name: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            id: LibraryId::new(),
            name: name.into(),
            folder: folder.into(),
            created_at: Utc::now(),
        }
    }
}
