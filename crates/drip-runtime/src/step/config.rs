//! Configuration schemas keyed by step subtype.

use std::collections::BTreeMap;

use drip_filter::{FilterGroups, PropertyValue};
use jiff::SignedDuration;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::TagId;
use crate::model::{AutomationStep, StepSubtype};

/// `TRIGGER_CONTACT_TAG_ADDED` / `TRIGGER_CONTACT_TAG_REMOVED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagTriggerConfig {
    pub tag_ids: Vec<TagId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_groups: Option<FilterGroups>,
}

/// `TRIGGER_CONTACT_SUBSCRIBED` / `TRIGGER_API_CALL`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_groups: Option<FilterGroups>,
}

/// Value written by `ACTION_UPDATE_CONTACT_ATTRIBUTES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    One(String),
    Many(Vec<String>),
}

impl From<AttributeValue> for PropertyValue {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::One(text) => Self::Text(text),
            AttributeValue::Many(items) => Self::List(items),
        }
    }
}

/// `ACTION_UPDATE_CONTACT_ATTRIBUTES`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttributesConfig {
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl UpdateAttributesConfig {
    /// Returns the attributes as property values.
    pub fn properties(&self) -> BTreeMap<String, PropertyValue> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.clone(), value.clone().into()))
            .collect()
    }
}

/// `RULE_IF_ELSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfElseConfig {
    pub filter_groups: FilterGroups,
}

/// Unit of a wait delay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WaitUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl WaitUnit {
    /// Returns the number of seconds in one unit.
    #[inline]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 60 * 60,
            Self::Days => 24 * 60 * 60,
        }
    }
}

/// `RULE_WAIT_FOR_DURATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitConfig {
    pub delay: u64,
    #[serde(default)]
    pub unit: WaitUnit,
}

impl WaitConfig {
    /// Returns the delay as a duration, `None` on overflow.
    pub fn duration(&self) -> Option<SignedDuration> {
        let seconds = self.delay.checked_mul(self.unit.seconds())?;
        i64::try_from(seconds).ok().map(SignedDuration::from_secs)
    }
}

/// Parsed configuration of a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    TagTrigger(TagTriggerConfig),
    Trigger(TriggerConfig),
    UpdateAttributes(UpdateAttributesConfig),
    IfElse(IfElseConfig),
    Wait(WaitConfig),
    /// Subtypes whose inputs live in step columns (`emailId`, `tagId`) or
    /// that take no input.
    Empty,
}

impl StepConfig {
    /// Parses a step's configuration according to its subtype.
    pub fn parse(step: &AutomationStep) -> RuntimeResult<Self> {
        let config = match step.subtype {
            StepSubtype::TriggerContactTagAdded | StepSubtype::TriggerContactTagRemoved => {
                Self::TagTrigger(decode(step)?)
            }
            StepSubtype::TriggerContactSubscribed | StepSubtype::TriggerApiCall => {
                Self::Trigger(decode(step)?)
            }
            StepSubtype::ActionUpdateContactAttributes => Self::UpdateAttributes(decode(step)?),
            StepSubtype::RuleIfElse => Self::IfElse(decode(step)?),
            StepSubtype::RuleWaitForDuration => Self::Wait(decode(step)?),
            StepSubtype::ActionSendEmail
            | StepSubtype::ActionAddTag
            | StepSubtype::ActionRemoveTag
            | StepSubtype::End => Self::Empty,
        };
        Ok(config)
    }

    /// Returns the filter attached to a trigger or rule, if any.
    pub fn filter_groups(&self) -> Option<&FilterGroups> {
        match self {
            Self::TagTrigger(config) => config.filter_groups.as_ref(),
            Self::Trigger(config) => config.filter_groups.as_ref(),
            Self::IfElse(config) => Some(&config.filter_groups),
            _ => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(step: &AutomationStep) -> RuntimeResult<T> {
    let value = match &step.configuration {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        value => value.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| RuntimeError::invalid_configuration(step.id, e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ids::AutomationId;

    fn step(subtype: StepSubtype, configuration: serde_json::Value) -> AutomationStep {
        AutomationStep::new(AutomationId::new(), subtype).with_configuration(configuration)
    }

    #[test]
    fn test_wait_unit_defaults_to_seconds() {
        let config = StepConfig::parse(&step(
            StepSubtype::RuleWaitForDuration,
            json!({ "delay": 90 }),
        ))
        .unwrap();

        let StepConfig::Wait(wait) = config else {
            panic!("expected wait config");
        };
        assert_eq!(wait.unit, WaitUnit::Seconds);
        assert_eq!(wait.duration(), Some(SignedDuration::from_secs(90)));
    }

    #[test]
    fn test_wait_in_days() {
        let wait = WaitConfig {
            delay: 2,
            unit: WaitUnit::Days,
        };
        assert_eq!(wait.duration(), Some(SignedDuration::from_hours(48)));
        assert_eq!(
            WaitConfig {
                delay: u64::MAX,
                unit: WaitUnit::Days
            }
            .duration(),
            None
        );
    }

    #[test]
    fn test_attributes_accept_strings_and_arrays() {
        let config = StepConfig::parse(&step(
            StepSubtype::ActionUpdateContactAttributes,
            json!({ "attributes": { "plan": "pro", "interests": ["golf", "chess"] } }),
        ))
        .unwrap();

        let StepConfig::UpdateAttributes(update) = config else {
            panic!("expected attributes config");
        };
        let properties = update.properties();
        assert_eq!(properties["plan"], PropertyValue::Text("pro".into()));
        assert_eq!(
            properties["interests"],
            PropertyValue::List(vec!["golf".into(), "chess".into()])
        );
    }

    #[test]
    fn test_null_configuration_for_optional_schemas() {
        let config =
            StepConfig::parse(&step(StepSubtype::TriggerApiCall, serde_json::Value::Null)).unwrap();
        assert_eq!(config, StepConfig::Trigger(TriggerConfig::default()));
        assert!(config.filter_groups().is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        let error = StepConfig::parse(&step(StepSubtype::RuleIfElse, json!({}))).unwrap_err();
        assert!(matches!(error, RuntimeError::InvalidConfiguration { .. }));

        let error = StepConfig::parse(&step(
            StepSubtype::RuleWaitForDuration,
            json!({ "delay": "soon" }),
        ))
        .unwrap_err();
        assert!(error.is_fatal());
    }
}
