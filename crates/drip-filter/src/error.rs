//! Filter error types.

use thiserror::Error;

use crate::model::{FilterField, FilterOperator};

/// Result type for filter operations.
pub type FilterResult<T> = Result<T, FilterError>;

/// Errors raised while validating or compiling a filter.
///
/// Compilation is all-or-nothing: the first error aborts the whole compile
/// and no partial predicate is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// The operator is not supported for the field's class.
    #[error("unsupported operation `{operator}` for field `{field}`")]
    UnsupportedOperator {
        /// Field the condition targets.
        field: FilterField,
        /// Operator that was requested.
        operator: FilterOperator,
    },

    /// The value does not have the shape the operator requires.
    #[error("invalid value for `{field}` {operator}: {reason}")]
    InvalidValue {
        /// Field the condition targets.
        field: FilterField,
        /// Operator that was requested.
        operator: FilterOperator,
        /// Why the value was rejected.
        reason: String,
    },

    /// The field name could not be parsed.
    #[error("unknown filter field `{0}`")]
    UnknownField(String),

    /// A time window literal is not of the form `<unit>_<n>`.
    #[error("invalid time window `{0}`, expected `<unit>_<n>`")]
    InvalidTimeWindow(String),
}

impl FilterError {
    /// Creates an unsupported operator error.
    pub fn unsupported(field: &FilterField, operator: FilterOperator) -> Self {
        Self::UnsupportedOperator {
            field: field.clone(),
            operator,
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(
        field: &FilterField,
        operator: FilterOperator,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.clone(),
            operator,
            reason: reason.into(),
        }
    }
}
