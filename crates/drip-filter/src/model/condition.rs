//! Conditions, condition groups and the top-level filter tree.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{FieldClass, FilterField, FilterOperator, FilterValue, TimeWindow};
use crate::error::{FilterError, FilterResult};

/// Boolean combinator of a group.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum GroupOperator {
    /// All members must hold; vacuously true when empty.
    #[default]
    #[serde(alias = "and")]
    And,
    /// Any member must hold; vacuously false when empty.
    #[serde(alias = "or")]
    Or,
}

/// A single `(field, operator, value)` leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Targeted field.
    pub field: FilterField,
    /// Operator applied to the field.
    pub operator: FilterOperator,
    /// Operand.
    pub value: FilterValue,
}

impl FilterCondition {
    /// Creates a new condition.
    pub fn new(field: FilterField, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
        }
    }

    /// Checks that the value has the shape the operator requires.
    ///
    /// Operator support for fixed field classes is checked here too; for
    /// custom properties it depends on the audience registry and is left to
    /// the compiler.
    pub fn validate(&self) -> FilterResult<()> {
        let field = &self.field;
        let operator = self.operator;
        let class = field.class();

        match class {
            FieldClass::Activity if operator != FilterOperator::InTimeWindow => {
                return Err(FilterError::unsupported(field, operator));
            }
            FieldClass::Membership
                if !matches!(
                    operator,
                    FilterOperator::Contains | FilterOperator::NotContains
                ) =>
            {
                return Err(FilterError::unsupported(field, operator));
            }
            FieldClass::Identity | FieldClass::Status
                if operator == FilterOperator::InTimeWindow =>
            {
                return Err(FilterError::unsupported(field, operator));
            }
            _ => {}
        }

        if class == FieldClass::Membership {
            self.membership_ids()?;
            return Ok(());
        }

        if operator.requires_array() {
            if self.value.as_list().is_none() {
                return Err(FilterError::invalid_value(field, operator, "expected an array"));
            }
            return Ok(());
        }

        let Some(scalar) = self.value.as_scalar() else {
            return Err(FilterError::invalid_value(field, operator, "expected a scalar"));
        };

        if operator == FilterOperator::InTimeWindow {
            let literal = scalar.as_text().ok_or_else(|| {
                FilterError::invalid_value(field, operator, "expected `<unit>_<n>`")
            })?;
            literal.parse::<TimeWindow>()?;
        }

        if operator.is_text_match() && scalar.as_text().is_none() {
            return Err(FilterError::invalid_value(field, operator, "expected a string"));
        }

        Ok(())
    }

    /// Parses the value as membership ids: an id array or a single id.
    pub fn membership_ids(&self) -> FilterResult<Vec<Uuid>> {
        self.value
            .elements()
            .iter()
            .map(|element| {
                element
                    .as_text()
                    .and_then(|text| text.parse::<Uuid>().ok())
                    .ok_or_else(|| {
                        FilterError::invalid_value(
                            &self.field,
                            self.operator,
                            format!("`{element}` is not an id"),
                        )
                    })
            })
            .collect()
    }
}

/// Conditions combined with one operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    /// Combinator over `conditions`.
    pub operator: GroupOperator,
    /// Leaf conditions.
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
}

impl ConditionGroup {
    /// Creates a group from its conditions.
    pub fn new(operator: GroupOperator, conditions: Vec<FilterCondition>) -> Self {
        Self {
            operator,
            conditions,
        }
    }
}

/// Top-level filter: condition groups combined with one operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterGroups {
    /// Combinator over `groups`.
    pub operator: GroupOperator,
    /// Condition groups.
    #[serde(default)]
    pub groups: Vec<ConditionGroup>,
}

impl FilterGroups {
    /// Creates a filter from its groups.
    pub fn new(operator: GroupOperator, groups: Vec<ConditionGroup>) -> Self {
        Self { operator, groups }
    }

    /// Returns whether the filter has no groups at all.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterates over every leaf condition.
    pub fn conditions(&self) -> impl Iterator<Item = &FilterCondition> {
        self.groups.iter().flat_map(|group| group.conditions.iter())
    }

    /// Validates every condition, failing on the first invalid one.
    pub fn validate(&self) -> FilterResult<()> {
        self.conditions().try_for_each(FilterCondition::validate)
    }
}
