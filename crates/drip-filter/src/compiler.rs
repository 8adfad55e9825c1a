//! Segment and trigger filter compiler.

use std::collections::HashMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::TRACING_TARGET_COMPILER;
use crate::error::{FilterError, FilterResult};
use crate::model::{
    FieldClass, FilterCondition, FilterGroups, FilterOperator, GroupOperator, PropertyKind,
    ScalarValue, TimeWindow,
};
use crate::predicate::{Clause, Comparison, Operand, Predicate, Target, Test};

/// How conditions on a property key missing from the registry compile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnknownPropertyPolicy {
    /// The condition is constant false.
    #[default]
    Never,
    /// The condition compares as text.
    Text,
}

/// Audience-scoped inputs of a compile.
#[derive(Debug, Clone)]
pub struct AudienceContext {
    properties: HashMap<String, PropertyKind>,
    now: Timestamp,
    unknown_property_policy: UnknownPropertyPolicy,
}

impl AudienceContext {
    /// Creates a context evaluated at `now` with an empty registry.
    pub fn new(now: Timestamp) -> Self {
        Self {
            properties: HashMap::new(),
            now,
            unknown_property_policy: UnknownPropertyPolicy::default(),
        }
    }

    /// Registers a known property.
    pub fn with_property(mut self, key: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.insert(key.into(), kind);
        self
    }

    /// Registers known properties.
    pub fn with_properties<K: Into<String>>(
        mut self,
        properties: impl IntoIterator<Item = (K, PropertyKind)>,
    ) -> Self {
        self.properties
            .extend(properties.into_iter().map(|(key, kind)| (key.into(), kind)));
        self
    }

    /// Sets the policy for unregistered property keys.
    pub fn with_unknown_property_policy(mut self, policy: UnknownPropertyPolicy) -> Self {
        self.unknown_property_policy = policy;
        self
    }

    /// Returns the declared kind of a property.
    pub fn property_kind(&self, key: &str) -> Option<PropertyKind> {
        self.properties.get(key).copied()
    }

    /// Returns the evaluation instant.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Returns the policy for unregistered property keys.
    pub fn unknown_property_policy(&self) -> UnknownPropertyPolicy {
        self.unknown_property_policy
    }
}

impl Default for AudienceContext {
    fn default() -> Self {
        Self::new(Timestamp::now())
    }
}

/// Compiles a filter into a predicate.
///
/// Fails on the first invalid condition; no partial predicate is returned.
pub fn compile(groups: &FilterGroups, context: &AudienceContext) -> FilterResult<Predicate> {
    let mut compiled = Vec::with_capacity(groups.groups.len());
    for group in &groups.groups {
        let conditions = group
            .conditions
            .iter()
            .map(|condition| compile_condition(condition, context))
            .collect::<FilterResult<Vec<_>>>()?;
        compiled.push(combine(group.operator, conditions));
    }

    let predicate = combine(groups.operator, compiled);
    tracing::debug!(
        target: TRACING_TARGET_COMPILER,
        groups = groups.groups.len(),
        clauses = predicate.clause_count(),
        "Compiled filter"
    );

    Ok(predicate)
}

fn combine(operator: GroupOperator, members: Vec<Predicate>) -> Predicate {
    match operator {
        GroupOperator::And => Predicate::all(members),
        GroupOperator::Or => Predicate::any(members),
    }
}

fn compile_condition(
    condition: &FilterCondition,
    context: &AudienceContext,
) -> FilterResult<Predicate> {
    let field = &condition.field;

    match field.class() {
        FieldClass::Identity | FieldClass::Status => {
            let column = field
                .contact_column()
                .ok_or_else(|| FilterError::UnknownField(field.to_string()))?;
            compile_text(Target::Column(column), condition)
        }
        FieldClass::Activity => {
            let column = field
                .activity_column()
                .ok_or_else(|| FilterError::UnknownField(field.to_string()))?;
            if condition.operator != FilterOperator::InTimeWindow {
                return Err(FilterError::unsupported(field, condition.operator));
            }
            compile_window(Target::Activity(column), condition, context)
        }
        FieldClass::Membership => {
            let membership = field
                .membership()
                .ok_or_else(|| FilterError::UnknownField(field.to_string()))?;
            let negated = match condition.operator {
                FilterOperator::Contains => false,
                FilterOperator::NotContains => true,
                operator => return Err(FilterError::unsupported(field, operator)),
            };
            let test = Test::HasAny(condition.membership_ids()?);
            Ok(clause(Target::Membership(membership), test, negated))
        }
        FieldClass::Property => {
            let key = field.property_key().unwrap_or_default();
            let kind = match context.property_kind(key) {
                Some(kind) => kind,
                None => match context.unknown_property_policy() {
                    UnknownPropertyPolicy::Never => {
                        tracing::debug!(
                            target: TRACING_TARGET_COMPILER,
                            property = key,
                            "Unregistered property, condition never matches"
                        );
                        return Ok(Predicate::Const(false));
                    }
                    UnknownPropertyPolicy::Text => PropertyKind::Text,
                },
            };

            let target = Target::Property {
                key: key.to_owned(),
                kind,
            };
            match kind {
                PropertyKind::Text => compile_text(target, condition),
                PropertyKind::Float => compile_float(target, condition),
                PropertyKind::Boolean => compile_boolean(target, condition),
                PropertyKind::Date => compile_date(target, condition, context),
            }
        }
    }
}

fn clause(target: Target, test: Test, negated: bool) -> Predicate {
    Predicate::Clause(Clause {
        target,
        test,
        negated,
    })
}

fn comparison(operator: FilterOperator) -> Option<(Comparison, bool)> {
    let comparison = match operator {
        FilterOperator::Eq => (Comparison::Eq, false),
        FilterOperator::Ne => (Comparison::Eq, true),
        FilterOperator::Gt => (Comparison::Gt, false),
        FilterOperator::Lt => (Comparison::Lt, false),
        FilterOperator::Gte => (Comparison::Gte, false),
        FilterOperator::Lte => (Comparison::Lte, false),
        _ => return None,
    };
    Some(comparison)
}

fn scalar(condition: &FilterCondition) -> FilterResult<&ScalarValue> {
    condition.value.as_scalar().ok_or_else(|| {
        FilterError::invalid_value(&condition.field, condition.operator, "expected a scalar")
    })
}

fn list(condition: &FilterCondition) -> FilterResult<&[ScalarValue]> {
    condition.value.as_list().ok_or_else(|| {
        FilterError::invalid_value(&condition.field, condition.operator, "expected an array")
    })
}

fn compile_text(target: Target, condition: &FilterCondition) -> FilterResult<Predicate> {
    let operator = condition.operator;

    if let Some((comparison, negated)) = comparison(operator) {
        let operand = Operand::Text(scalar(condition)?.to_text());
        return Ok(clause(target, Test::Compare(comparison, operand), negated));
    }

    let predicate = match operator {
        FilterOperator::In | FilterOperator::Nin => {
            let operands = list(condition)?
                .iter()
                .map(|value| Operand::Text(value.to_text()))
                .collect();
            clause(target, Test::OneOf(operands), operator == FilterOperator::Nin)
        }
        FilterOperator::StartsWith => clause(target, Test::StartsWith(needle(condition)?), false),
        FilterOperator::EndsWith => clause(target, Test::EndsWith(needle(condition)?), false),
        FilterOperator::Contains => clause(target, Test::Contains(needle(condition)?), false),
        FilterOperator::NotContains => clause(target, Test::Contains(needle(condition)?), true),
        _ => return Err(FilterError::unsupported(&condition.field, operator)),
    };

    Ok(predicate)
}

fn needle(condition: &FilterCondition) -> FilterResult<String> {
    scalar(condition)?.as_text().map(str::to_owned).ok_or_else(|| {
        FilterError::invalid_value(&condition.field, condition.operator, "expected a string")
    })
}

fn float(condition: &FilterCondition, value: &ScalarValue) -> FilterResult<Operand> {
    value.as_number().map(Operand::Float).ok_or_else(|| {
        FilterError::invalid_value(
            &condition.field,
            condition.operator,
            format!("`{value}` is not a number"),
        )
    })
}

fn compile_float(target: Target, condition: &FilterCondition) -> FilterResult<Predicate> {
    let operator = condition.operator;

    if let Some((comparison, negated)) = comparison(operator) {
        let operand = float(condition, scalar(condition)?)?;
        return Ok(clause(target, Test::Compare(comparison, operand), negated));
    }

    match operator {
        FilterOperator::In | FilterOperator::Nin => {
            let operands = list(condition)?
                .iter()
                .map(|value| float(condition, value))
                .collect::<FilterResult<Vec<_>>>()?;
            Ok(clause(target, Test::OneOf(operands), operator == FilterOperator::Nin))
        }
        _ => Err(FilterError::unsupported(&condition.field, operator)),
    }
}

fn compile_boolean(target: Target, condition: &FilterCondition) -> FilterResult<Predicate> {
    let operator = condition.operator;
    let negated = match operator {
        FilterOperator::Eq => false,
        FilterOperator::Ne => true,
        _ => return Err(FilterError::unsupported(&condition.field, operator)),
    };

    let value = scalar(condition)?;
    let flag = value.as_bool().ok_or_else(|| {
        FilterError::invalid_value(
            &condition.field,
            operator,
            format!("`{value}` is not a boolean"),
        )
    })?;

    Ok(clause(
        target,
        Test::Compare(Comparison::Eq, Operand::Bool(flag)),
        negated,
    ))
}

fn compile_date(
    target: Target,
    condition: &FilterCondition,
    context: &AudienceContext,
) -> FilterResult<Predicate> {
    let operator = condition.operator;

    if operator == FilterOperator::InTimeWindow {
        return compile_window(target, condition, context);
    }

    let Some((comparison, negated)) = comparison(operator) else {
        return Err(FilterError::unsupported(&condition.field, operator));
    };

    let value = scalar(condition)?;
    let timestamp = value
        .as_text()
        .and_then(|text| text.parse::<Timestamp>().ok())
        .ok_or_else(|| {
            FilterError::invalid_value(
                &condition.field,
                operator,
                format!("`{value}` is not an RFC 3339 timestamp"),
            )
        })?;

    Ok(clause(
        target,
        Test::Compare(comparison, Operand::Date(timestamp)),
        negated,
    ))
}

fn compile_window(
    target: Target,
    condition: &FilterCondition,
    context: &AudienceContext,
) -> FilterResult<Predicate> {
    let literal = scalar(condition)?.as_text().ok_or_else(|| {
        FilterError::invalid_value(&condition.field, condition.operator, "expected `<unit>_<n>`")
    })?;
    let (since, until) = literal.parse::<TimeWindow>()?.bounds(context.now())?;

    Ok(clause(target, Test::Within { since, until }, false))
}
