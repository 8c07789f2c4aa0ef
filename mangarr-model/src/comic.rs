//! ComicInfo vocabularies for chapter format and age rating.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::lockable::FieldValue;

macro_rules! comic_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
        )]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Label written into `ComicInfo.xml`.
            pub fn label(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            pub fn ordinal(self) -> usize {
                self as usize
            }

            pub fn from_ordinal(ordinal: u64) -> Option<Self> {
                usize::try_from(ordinal)
                    .ok()
                    .and_then(|idx| Self::ALL.get(idx).copied())
            }

            /// Matches either the variant name or its ComicInfo label,
            /// ignoring case.
            pub fn from_name(name: &str) -> Option<Self> {
                let name = name.trim();
                Self::ALL.iter().copied().find(|candidate| {
                    candidate.label().eq_ignore_ascii_case(name)
                        || format!("{candidate:?}").eq_ignore_ascii_case(name)
                })
            }
        }

        impl FieldValue for $name {
            fn from_json(raw: &Value) -> Result<Self, ValidationError> {
                let parsed = match raw {
                    Value::Number(n) => n.as_u64().and_then(Self::from_ordinal),
                    Value::String(s) => s
                        .trim()
                        .parse::<u64>()
                        .ok()
                        .and_then(Self::from_ordinal)
                        .or_else(|| Self::from_name(s)),
                    _ => None,
                };
                parsed.ok_or_else(|| {
                    ValidationError::new(stringify!($name), raw)
                })
            }
        }
    };
}

comic_enum!(
    /// Publication format of a chapter.
    Format {
        Normal => "",
        Special => "Special",
        Reference => "Reference",
        DirectorsCut => "Director's Cut",
        BoxSet => "Box Set",
        Annual => "Annual",
        Anthology => "Anthology",
        Epilogue => "Epilogue",
        OneShot => "One-Shot",
        Prologue => "Prologue",
        Tpb => "TPB",
        TradePaperBack => "Trade Paper Back",
        Omnibus => "Omnibus",
        Compendium => "Compendium",
        Absolute => "Absolute",
        GraphicNovel => "Graphic Novel",
        Magazine => "Magazine",
        Fcb => "FCB",
    }
);

comic_enum!(
    /// Audience rating of a chapter.
    AgeRating {
        Unknown => "Unknown",
        AdultsOnly => "Adults Only 18+",
        EarlyChildhood => "Early Childhood",
        Everyone => "Everyone",
        EveryoneTenPlus => "Everyone 10+",
        G => "G",
        KidsToAdults => "Kids to Adults",
        M => "M",
        Ma15 => "MA15+",
        Mature17 => "Mature 17+",
        Pg => "PG",
        R18 => "R18+",
        RatingPending => "Rating Pending",
        Teen => "Teen",
        X18 => "X18+",
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ordinals_map_to_labels() {
        assert_eq!(Format::from_ordinal(8), Some(Format::OneShot));
        assert_eq!(Format::OneShot.label(), "One-Shot");
        assert_eq!(Format::from_ordinal(18), None);
        assert_eq!(AgeRating::from_ordinal(13), Some(AgeRating::Teen));
        assert_eq!(AgeRating::default(), AgeRating::Unknown);
    }

    #[test]
    fn coercion_accepts_ordinals_and_labels() {
        assert_eq!(Format::from_json(&json!(3)).unwrap(), Format::DirectorsCut);
        assert_eq!(
            AgeRating::from_json(&json!("mature 17+")).unwrap(),
            AgeRating::Mature17
        );
        assert_eq!(AgeRating::from_json(&json!("4")).unwrap(), AgeRating::EveryoneTenPlus);
        assert!(AgeRating::from_json(&json!(true)).is_err());
    }
}
