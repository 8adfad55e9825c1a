//! Trigger, rule and terminal executors.

use std::sync::Arc;

use async_trait::async_trait;
use drip_filter::{AudienceContext, UnknownPropertyPolicy};
use jiff::Timestamp;

use super::executor::{Effect, ExecutionContext, Prepared, StepExecutor};
use crate::error::{RuntimeError, RuntimeResult};
use crate::model::{AutomationStep, Branch, Contact};
use crate::step::StepConfig;
use crate::store::ContactStore;

/// Trigger steps; matching happened at dispatch, so they only advance.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl StepExecutor for TriggerExecutor {
    async fn execute(&self, _context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        Ok(Effect::Advance)
    }
}

/// `END`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndExecutor;

#[async_trait]
impl StepExecutor for EndExecutor {
    async fn execute(&self, _context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        Ok(Effect::Finish)
    }
}

/// `RULE_IF_ELSE`: evaluates the filter against the contact and takes the
/// `YES` or `NO` branch.
pub struct IfElseExecutor {
    contacts: Arc<dyn ContactStore>,
    policy: UnknownPropertyPolicy,
}

impl IfElseExecutor {
    pub fn new(contacts: Arc<dyn ContactStore>, policy: UnknownPropertyPolicy) -> Self {
        Self { contacts, policy }
    }
}

#[async_trait]
impl StepExecutor for IfElseExecutor {
    async fn prepare(
        &self,
        step: &AutomationStep,
        config: &StepConfig,
        contact: &Contact,
        now: Timestamp,
    ) -> RuntimeResult<Prepared> {
        let StepConfig::IfElse(config) = config else {
            return Err(RuntimeError::invalid_configuration(
                step.id,
                "expected filterGroups configuration",
            ));
        };

        let properties = self.contacts.known_properties(contact.audience_id).await?;
        let audience = AudienceContext::new(now)
            .with_properties(properties)
            .with_unknown_property_policy(self.policy);

        let predicate = drip_filter::compile(&config.filter_groups, &audience)
            .map_err(|e| RuntimeError::invalid_configuration(step.id, e.to_string()))?;
        Ok(Prepared::Filter(predicate))
    }

    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        let Prepared::Filter(predicate) = context.prepared else {
            return Err(RuntimeError::invalid_configuration(
                context.step.id,
                "filter was not compiled",
            ));
        };
        Ok(Effect::Branch(Branch::from(predicate.evaluate(context.contact))))
    }
}

/// `RULE_WAIT_FOR_DURATION`: due once the delay has elapsed since the
/// contact entered the step.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitExecutor;

#[async_trait]
impl StepExecutor for WaitExecutor {
    async fn prepare(
        &self,
        step: &AutomationStep,
        config: &StepConfig,
        _contact: &Contact,
        now: Timestamp,
    ) -> RuntimeResult<Prepared> {
        let StepConfig::Wait(config) = config else {
            return Err(RuntimeError::invalid_configuration(
                step.id,
                "expected wait configuration",
            ));
        };

        config
            .duration()
            .filter(|delay| now.checked_add(*delay).is_ok())
            .map(Prepared::Delay)
            .ok_or_else(|| RuntimeError::invalid_configuration(step.id, "delay out of range"))
    }

    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        let step = context.step;
        let Prepared::Delay(delay) = context.prepared else {
            return Err(RuntimeError::invalid_configuration(
                step.id,
                "delay was not resolved",
            ));
        };

        let due = context
            .entry
            .created_at
            .checked_add(*delay)
            .map_err(|_| RuntimeError::invalid_configuration(step.id, "delay out of range"))?;

        if due <= context.now {
            Ok(Effect::Advance)
        } else {
            Ok(Effect::Wait { until: due })
        }
    }
}
