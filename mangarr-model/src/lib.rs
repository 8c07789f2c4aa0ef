//! Core data model definitions shared across Mangarr crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod chapter;
pub mod comic;
pub mod error;
pub mod fields;
pub mod ids;
pub mod library;
pub mod lockable;
pub mod manga;
pub mod numbers;
pub mod volume;

pub use chapter::Chapter;
pub use comic::{AgeRating, Format};
pub use error::{FieldError, ModelError, Result as ModelResult, ValidationError};
pub use fields::{
    Arguments, FieldKey, MergeReport, Mergeable, merge_arguments,
    merge_fields, union_arguments,
};
pub use ids::{ChapterId, JobId, LibraryId, MangaId, VolumeId};
pub use library::Library;
pub use lockable::{FieldValue, LockableField, MergeField, SetOutcome};
pub use manga::Manga;
pub use numbers::{compare_numbers, format_number};
pub use volume::Volume;
