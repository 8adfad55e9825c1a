//! Filter fields and their resolution classes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::error::FilterError;
use crate::predicate::{ActivityColumn, ContactColumn, Membership};

/// Prefix of dynamic custom property references.
const PROPERTY_PREFIX: &str = "properties.";

/// Field a condition targets.
///
/// Fixed fields map onto contact columns, activity timestamps or membership
/// sets. `Property` references a custom property by key and is written as
/// `properties.<key>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FilterField {
    Email,
    FirstName,
    LastName,
    Phone,
    Status,
    Source,
    LastOpenedAt,
    LastClickedAt,
    LastSentAt,
    Tags,
    Segments,
    /// Custom property key (without the `properties.` prefix).
    Property(String),
}

/// Resolution strategy a field is compiled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum FieldClass {
    /// Contact identity column (text).
    Identity,
    /// Contact status or acquisition source column (text).
    Status,
    /// Activity timestamp, only `inTimeWindow` applies.
    Activity,
    /// Tag or segment membership set.
    Membership,
    /// Custom property, typed through the audience registry.
    Property,
}

impl FilterField {
    /// Returns the class that decides how the field is compiled.
    pub fn class(&self) -> FieldClass {
        match self {
            Self::Email | Self::FirstName | Self::LastName | Self::Phone => FieldClass::Identity,
            Self::Status | Self::Source => FieldClass::Status,
            Self::LastOpenedAt | Self::LastClickedAt | Self::LastSentAt => FieldClass::Activity,
            Self::Tags | Self::Segments => FieldClass::Membership,
            Self::Property(_) => FieldClass::Property,
        }
    }

    /// Returns the contact column for identity and status fields.
    pub fn contact_column(&self) -> Option<ContactColumn> {
        let column = match self {
            Self::Email => ContactColumn::Email,
            Self::FirstName => ContactColumn::FirstName,
            Self::LastName => ContactColumn::LastName,
            Self::Phone => ContactColumn::Phone,
            Self::Status => ContactColumn::Status,
            Self::Source => ContactColumn::Source,
            _ => return None,
        };
        Some(column)
    }

    /// Returns the activity column for activity fields.
    pub fn activity_column(&self) -> Option<ActivityColumn> {
        match self {
            Self::LastOpenedAt => Some(ActivityColumn::LastOpenedAt),
            Self::LastClickedAt => Some(ActivityColumn::LastClickedAt),
            Self::LastSentAt => Some(ActivityColumn::LastSentAt),
            _ => None,
        }
    }

    /// Returns the membership set for `tags` and `segments`.
    pub fn membership(&self) -> Option<Membership> {
        match self {
            Self::Tags => Some(Membership::Tags),
            Self::Segments => Some(Membership::Segments),
            _ => None,
        }
    }

    /// Returns the custom property key for `properties.<key>` fields.
    pub fn property_key(&self) -> Option<&str> {
        match self {
            Self::Property(key) => Some(key),
            _ => None,
        }
    }

    fn fixed_name(&self) -> Option<&'static str> {
        let name = match self {
            Self::Email => "email",
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::Phone => "phone",
            Self::Status => "status",
            Self::Source => "source",
            Self::LastOpenedAt => "lastOpenedAt",
            Self::LastClickedAt => "lastClickedAt",
            Self::LastSentAt => "lastSentAt",
            Self::Tags => "tags",
            Self::Segments => "segments",
            Self::Property(_) => return None,
        };
        Some(name)
    }
}

impl FromStr for FilterField {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "email" => Self::Email,
            "firstName" => Self::FirstName,
            "lastName" => Self::LastName,
            "phone" => Self::Phone,
            "status" => Self::Status,
            "source" => Self::Source,
            "lastOpenedAt" => Self::LastOpenedAt,
            "lastClickedAt" => Self::LastClickedAt,
            "lastSentAt" => Self::LastSentAt,
            "tags" => Self::Tags,
            "segments" => Self::Segments,
            other => match other.strip_prefix(PROPERTY_PREFIX) {
                Some(key) if !key.is_empty() => Self::Property(key.to_owned()),
                _ => return Err(FilterError::UnknownField(other.to_owned())),
            },
        };
        Ok(field)
    }
}

impl TryFrom<String> for FilterField {
    type Error = FilterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterField> for String {
    fn from(field: FilterField) -> Self {
        field.to_string()
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fixed_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{PROPERTY_PREFIX}{}", self.property_key().unwrap_or_default()),
        }
    }
}
