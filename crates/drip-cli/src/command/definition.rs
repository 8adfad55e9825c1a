//! Automation definition files.

use std::collections::HashMap;

use drip_filter::PropertyKind;
use drip_runtime::graph::AutomationGraph;
use drip_runtime::model::{Automation, AutomationStep};
use drip_runtime::step::validate_automation;
use drip_runtime::RuntimeResult;
use serde::{Deserialize, Serialize};

/// An automation, its steps and the audience's property registry.
///
/// ```json
/// {
///   "automation": { "id": "...", "audienceId": "...", "name": "Welcome", "status": "ACTIVE" },
///   "steps": [ { "id": "...", "automationId": "...", "type": "TRIGGER", "subtype": "TRIGGER_API_CALL" } ],
///   "properties": { "plan": "text" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationDefinition {
    pub automation: Automation,
    pub steps: Vec<AutomationStep>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyKind>,
}

impl AutomationDefinition {
    /// Validates every step and the graph they form.
    pub fn validate(&self) -> RuntimeResult<AutomationGraph> {
        let foreign = self
            .steps
            .iter()
            .find(|step| step.automation_id != self.automation.id);
        if let Some(step) = foreign {
            return Err(drip_runtime::RuntimeError::invalid_graph(format!(
                "step {} belongs to automation {}, not {}",
                step.id, step.automation_id, self.automation.id
            )));
        }

        validate_automation(self.steps.clone(), &self.properties)
    }
}
