//! Declared custom property types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Declared type of a custom contact property in an audience's registry.
///
/// The kind selects the typed storage column a condition compares against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PropertyKind {
    /// `true` / `false`.
    Boolean,
    /// Floating point number.
    Float,
    /// Free text.
    #[default]
    Text,
    /// RFC 3339 timestamp.
    Date,
}

impl PropertyKind {
    /// Returns the typed value column used by the contact property table.
    #[inline]
    pub fn column(self) -> &'static str {
        match self {
            Self::Boolean => "value_bool",
            Self::Float => "value_float",
            Self::Text => "value_text",
            Self::Date => "value_date",
        }
    }
}
