use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::RuntimeResult;
use crate::ids::{AudienceId, AutomationId, StepId};
use crate::model::{Automation, AutomationStatus, AutomationStep, Branch, StepSubtype};
use crate::store::AutomationStore;

#[derive(Debug, Default)]
struct AutomationState {
    automations: HashMap<AutomationId, Automation>,
    steps: HashMap<StepId, AutomationStep>,
}

/// Automation store backed by maps.
#[derive(Debug, Default)]
pub struct MemoryAutomationStore {
    state: Mutex<AutomationState>,
}

impl MemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an automation.
    pub fn insert_automation(&self, automation: Automation) {
        self.lock().automations.insert(automation.id, automation);
    }

    /// Inserts or replaces a step without validation.
    pub fn insert_step(&self, step: AutomationStep) {
        self.lock().steps.insert(step.id, step);
    }

    /// Removes a step.
    pub fn remove_step(&self, id: StepId) -> Option<AutomationStep> {
        self.lock().steps.remove(&id)
    }

    fn lock(&self) -> MutexGuard<'_, AutomationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AutomationStore for MemoryAutomationStore {
    async fn find_automation(&self, id: AutomationId) -> RuntimeResult<Option<Automation>> {
        Ok(self.lock().automations.get(&id).cloned())
    }

    async fn find_step(&self, id: StepId) -> RuntimeResult<Option<AutomationStep>> {
        Ok(self.lock().steps.get(&id).cloned())
    }

    async fn find_child_step(
        &self,
        parent_id: StepId,
        branch: Option<Branch>,
    ) -> RuntimeResult<Option<AutomationStep>> {
        Ok(self
            .lock()
            .steps
            .values()
            .filter(|step| step.parent_id == Some(parent_id) && step.branch == branch)
            .min_by_key(|step| step.id)
            .cloned())
    }

    async fn find_steps_by_subtype_and_status(
        &self,
        audience_id: AudienceId,
        subtype: StepSubtype,
        status: AutomationStatus,
    ) -> RuntimeResult<Vec<AutomationStep>> {
        let state = self.lock();
        let mut steps: Vec<_> = state
            .steps
            .values()
            .filter(|step| step.subtype == subtype)
            .filter(|step| {
                state.automations.get(&step.automation_id).is_some_and(|automation| {
                    automation.audience_id == audience_id && automation.status == status
                })
            })
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.id);
        Ok(steps)
    }

    async fn steps_for_automation(
        &self,
        automation_id: AutomationId,
    ) -> RuntimeResult<Vec<AutomationStep>> {
        let mut steps: Vec<_> = self
            .lock()
            .steps
            .values()
            .filter(|step| step.automation_id == automation_id)
            .cloned()
            .collect();
        steps.sort_by_key(|step| step.id);
        Ok(steps)
    }

    async fn save_step(&self, step: AutomationStep) -> RuntimeResult<()> {
        self.insert_step(step);
        Ok(())
    }
}
