//! `drip validate`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use drip_runtime::model::{Branch, StepSubtype};
use drip_runtime::{AutomationId, StepId};
use serde::Serialize;

use super::definition::AutomationDefinition;
use super::read_json;
use crate::TRACING_TARGET_COMMAND;

/// Arguments of `drip validate`.
#[derive(Debug, Clone, Args)]
pub struct ValidateArgs {
    /// Automation definition JSON file (`-` for stdin).
    pub definition: PathBuf,
}

/// Summary of a valid automation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub automation_id: AutomationId,
    pub trigger: StepId,
    /// Steps in topological order.
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: StepId,
    pub subtype: StepSubtype,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<StepId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

pub fn run(args: &ValidateArgs) -> anyhow::Result<ValidationReport> {
    let definition: AutomationDefinition = read_json(&args.definition)?;
    report(&definition)
}

fn report(definition: &AutomationDefinition) -> anyhow::Result<ValidationReport> {
    let graph = definition
        .validate()
        .context("automation definition is invalid")?;

    let steps = graph
        .topological_order()?
        .into_iter()
        .map(|step| StepSummary {
            id: step.id,
            subtype: step.subtype,
            parent_id: step.parent_id,
            branch: step.branch,
        })
        .collect::<Vec<_>>();

    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        automation_id = %definition.automation.id,
        steps = steps.len(),
        "Automation definition is valid"
    );

    Ok(ValidationReport {
        automation_id: definition.automation.id,
        trigger: graph.trigger().id,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use drip_runtime::model::{Automation, AutomationStep};
    use drip_runtime::{AudienceId, TagId};
    use serde_json::json;

    use super::*;

    fn definition() -> AutomationDefinition {
        let automation = Automation::new(AudienceId::new(), "Welcome");
        let trigger = AutomationStep::new(automation.id, StepSubtype::TriggerApiCall);
        let rule = AutomationStep::new(automation.id, StepSubtype::RuleIfElse)
            .with_parent(trigger.id)
            .with_configuration(json!({
                "filterGroups": {
                    "operator": "AND",
                    "groups": [{
                        "operator": "AND",
                        "conditions": [{ "field": "properties.plan", "operator": "eq", "value": "pro" }]
                    }]
                }
            }));
        let tag = AutomationStep::new(automation.id, StepSubtype::ActionAddTag)
            .with_branch(rule.id, Branch::Yes)
            .with_tag(TagId::new());
        let end = AutomationStep::new(automation.id, StepSubtype::End)
            .with_branch(rule.id, Branch::No);

        AutomationDefinition {
            automation,
            steps: vec![end, tag, rule, trigger],
            properties: HashMap::from([("plan".to_owned(), drip_filter::PropertyKind::Text)]),
        }
    }

    #[test]
    fn test_valid_definition() {
        let definition = definition();
        let report = report(&definition).unwrap();

        assert_eq!(report.steps.len(), 4);
        assert_eq!(report.steps[0].id, report.trigger);
        assert_eq!(report.steps[0].subtype, StepSubtype::TriggerApiCall);
        assert_eq!(report.steps[1].subtype, StepSubtype::RuleIfElse);
    }

    #[test]
    fn test_missing_tag_column() {
        let mut definition = definition();
        for step in &mut definition.steps {
            if step.subtype == StepSubtype::ActionAddTag {
                step.tag_id = None;
            }
        }

        assert!(report(&definition).is_err());
    }

    #[test]
    fn test_step_of_other_automation() {
        let mut definition = definition();
        definition.steps[0].automation_id = AutomationId::new();

        assert!(report(&definition).is_err());
    }
}
