//! Write-time validation of a single step.

use std::collections::HashMap;

use drip_filter::{AudienceContext, PropertyKind};
use jiff::Timestamp;

use super::config::StepConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::AutomationGraph;
use crate::model::{AutomationStep, StepSubtype, StepType};

/// Validates a step against its subtype and returns the parsed configuration.
///
/// Graph-level rules (single trigger, branch labels, cycles) are checked by
/// [`AutomationGraph`](crate::graph::AutomationGraph).
pub fn validate_step(step: &AutomationStep) -> RuntimeResult<StepConfig> {
    let invalid = |message: &str| RuntimeError::invalid_configuration(step.id, message);

    if step.subtype.step_type() != step.step_type {
        return Err(RuntimeError::invalid_configuration(
            step.id,
            format!(
                "subtype {} does not belong to type {}",
                step.subtype, step.step_type
            ),
        ));
    }

    match (step.step_type, step.parent_id) {
        (StepType::Trigger, Some(_)) => return Err(invalid("trigger steps have no parent")),
        (StepType::Trigger, None) => {}
        (_, None) => return Err(invalid("only trigger steps may omit parentId")),
        (_, Some(parent)) if parent == step.id => return Err(invalid("step is its own parent")),
        (_, Some(_)) => {}
    }

    match step.subtype {
        StepSubtype::ActionSendEmail if step.email_id.is_none() => {
            return Err(invalid("ACTION_SEND_EMAIL requires emailId"));
        }
        StepSubtype::ActionAddTag | StepSubtype::ActionRemoveTag if step.tag_id.is_none() => {
            return Err(invalid("tag actions require tagId"));
        }
        _ => {}
    }

    let config = StepConfig::parse(step)?;
    match &config {
        StepConfig::TagTrigger(trigger) if trigger.tag_ids.is_empty() => {
            return Err(invalid("tagIds must not be empty"));
        }
        StepConfig::UpdateAttributes(update) if update.attributes.is_empty() => {
            return Err(invalid("attributes must not be empty"));
        }
        _ => {}
    }

    if let Some(groups) = config.filter_groups() {
        groups
            .validate()
            .map_err(|e| RuntimeError::invalid_configuration(step.id, e.to_string()))?;
    }

    Ok(config)
}

/// Validates a whole automation: every step, every filter against the
/// audience's property registry, then the graph.
pub fn validate_automation(
    steps: Vec<AutomationStep>,
    properties: &HashMap<String, PropertyKind>,
) -> RuntimeResult<AutomationGraph> {
    let audience = AudienceContext::new(Timestamp::now())
        .with_properties(properties.iter().map(|(key, kind)| (key.clone(), *kind)));

    for step in &steps {
        let config = validate_step(step)?;
        if let Some(groups) = config.filter_groups() {
            drip_filter::compile(groups, &audience)
                .map_err(|e| RuntimeError::invalid_configuration(step.id, e.to_string()))?;
        }
    }

    AutomationGraph::build(steps)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ids::{AutomationId, EmailId, StepId, TagId};

    fn child(subtype: StepSubtype) -> AutomationStep {
        AutomationStep::new(AutomationId::new(), subtype).with_parent(StepId::new())
    }

    #[test]
    fn test_family_mismatch() {
        let mut step = child(StepSubtype::ActionAddTag).with_tag(TagId::new());
        step.step_type = StepType::Rule;
        assert!(matches!(
            validate_step(&step),
            Err(RuntimeError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_required_columns() {
        assert!(validate_step(&child(StepSubtype::ActionSendEmail)).is_err());
        assert!(validate_step(&child(StepSubtype::ActionSendEmail).with_email(EmailId::new())).is_ok());
        assert!(validate_step(&child(StepSubtype::ActionRemoveTag)).is_err());
        assert!(validate_step(&child(StepSubtype::ActionRemoveTag).with_tag(TagId::new())).is_ok());
    }

    #[test]
    fn test_parent_rules() {
        let trigger = AutomationStep::new(AutomationId::new(), StepSubtype::TriggerApiCall);
        assert!(validate_step(&trigger).is_ok());
        assert!(validate_step(&trigger.clone().with_parent(StepId::new())).is_err());

        let orphan = AutomationStep::new(AutomationId::new(), StepSubtype::End);
        assert!(validate_step(&orphan).is_err());
    }

    #[test]
    fn test_if_else_requires_well_formed_filter() {
        let step = child(StepSubtype::RuleIfElse).with_configuration(json!({
            "filterGroups": {
                "operator": "AND",
                "groups": [{
                    "operator": "AND",
                    "conditions": [{ "field": "lastOpenedAt", "operator": "eq", "value": "x" }]
                }]
            }
        }));
        assert!(validate_step(&step).is_err());

        let step = child(StepSubtype::RuleIfElse).with_configuration(json!({
            "filterGroups": {
                "operator": "AND",
                "groups": [{
                    "operator": "AND",
                    "conditions": [{ "field": "lastOpenedAt", "operator": "inTimeWindow", "value": "days_30" }]
                }]
            }
        }));
        assert!(matches!(validate_step(&step), Ok(StepConfig::IfElse(_))));
    }

    #[test]
    fn test_wait_requires_numeric_delay() {
        let step = child(StepSubtype::RuleWaitForDuration).with_configuration(json!({}));
        assert!(validate_step(&step).is_err());

        let step = child(StepSubtype::RuleWaitForDuration)
            .with_configuration(json!({ "delay": 3, "unit": "hours" }));
        assert!(validate_step(&step).is_ok());
    }

    #[test]
    fn test_tag_trigger_requires_tags() {
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::TriggerContactTagAdded)
            .with_configuration(json!({ "tagIds": [] }));
        assert!(validate_step(&step).is_err());
    }

    #[test]
    fn test_automation_rejects_unsupported_property_operator() {
        let trigger = AutomationStep::new(AutomationId::new(), StepSubtype::TriggerApiCall);
        let rule = AutomationStep::new(trigger.automation_id, StepSubtype::RuleIfElse)
            .with_parent(trigger.id)
            .with_configuration(json!({
                "filterGroups": {
                    "operator": "AND",
                    "groups": [{
                        "operator": "AND",
                        "conditions": [
                            { "field": "properties.vip", "operator": "gt", "value": true }
                        ]
                    }]
                }
            }));
        let properties = HashMap::from([("vip".to_owned(), PropertyKind::Boolean)]);

        let error = validate_automation(vec![trigger.clone(), rule.clone()], &properties)
            .unwrap_err();
        assert!(matches!(error, RuntimeError::InvalidConfiguration { step_id, .. } if step_id == rule.id));

        let graph = validate_automation(vec![trigger, rule], &HashMap::new()).unwrap();
        assert_eq!(graph.step_count(), 2);
    }
}
