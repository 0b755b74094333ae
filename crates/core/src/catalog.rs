//! Reference catalog identifiers.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three reference catalogs an image is matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogKind {
    /// Messier objects. Small and curated, queried without a row cap.
    Messier,
    /// NGC and IC objects.
    Ngc,
    /// Named stars (point objects).
    NamedStar,
}

impl CatalogKind {
    /// All catalogs in matching order.
    pub const ALL: [CatalogKind; 3] = [Self::Messier, Self::Ngc, Self::NamedStar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messier => "MESSIER",
            Self::Ngc => "NGC",
            Self::NamedStar => "NAMED_STAR",
        }
    }

    /// Whether coordinate lookups should also try the normalized designation.
    pub fn normalizes_designations(&self) -> bool {
        matches!(self, Self::NamedStar)
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "MESSIER" => Ok(Self::Messier),
            "NGC" | "IC" => Ok(Self::Ngc),
            "NAMED_STAR" => Ok(Self::NamedStar),
            _ => Err(Error::InvalidValue {
                field: "catalog_kind",
                value: s.to_string(),
            }),
        }
    }
}

/// Normalize a designation for equality comparison.
///
/// Historical records stored point-object designations both with and without
/// spaces ("HD 12345" / "HD12345"), so lookups compare uppercase, space-free forms.
pub fn normalize_designation(designation: &str) -> String {
    designation
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
