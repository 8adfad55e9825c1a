//! Condition operators.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Operator applied between a field and a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FilterOperator {
    /// Equal to.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal to.
    Gte,
    /// Less than or equal to.
    Lte,
    /// Member of the given array.
    In,
    /// Not a member of the given array.
    Nin,
    /// Text starts with.
    StartsWith,
    /// Text ends with.
    EndsWith,
    /// Text contains, or membership set contains any of the given ids.
    Contains,
    /// Text does not contain, or membership set contains none of the given ids.
    NotContains,
    /// Timestamp falls within the trailing window (`"<unit>_<n>"`).
    InTimeWindow,
}

impl FilterOperator {
    /// Returns whether the operator expects an array value.
    #[inline]
    pub fn requires_array(self) -> bool {
        matches!(self, Self::In | Self::Nin)
    }

    /// Returns whether the operator is an ordering comparison.
    #[inline]
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }

    /// Returns whether the operator is a text pattern match.
    #[inline]
    pub fn is_text_match(self) -> bool {
        matches!(
            self,
            Self::StartsWith | Self::EndsWith | Self::Contains | Self::NotContains
        )
    }
}
