//! Per-contact step execution.
//!
//! Each [`StepSubtype`] has exactly one [`StepExecutor`]. The executors are
//! registered in a lookup table built by an exhaustive match over the
//! subtype enum, so adding a subtype without an executor does not compile.
//! Running a step has two phases: [`StepRunner::prepare`] parses and checks
//! the configuration without side effects, then [`StepRunner::run`] performs
//! the effect. Executors report an [`Effect`]; the runner turns it into a
//! [`StepOutcome`], resolving the next step by parent id and branch label.

mod action;
mod executor;
mod rule;

use std::collections::HashMap;
use std::sync::Arc;

use jiff::Timestamp;
use strum::IntoEnumIterator;

pub use self::action::{SendEmailExecutor, TagExecutor, UpdateAttributesExecutor};
pub use self::executor::{Effect, ExecutionContext, Prepared, StepExecutor};
pub use self::rule::{EndExecutor, IfElseExecutor, TriggerExecutor, WaitExecutor};
use crate::TRACING_TARGET_RUNNER;
use crate::config::EngineConfig;
use crate::engine::Collaborators;
use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::StepId;
use crate::model::{AutomationStep, Contact, LedgerEntry, StepSubtype};
use crate::step::StepConfig;
use crate::store::AutomationStore;

/// Result of running one step for one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran; `next` is the step to schedule, if any.
    Completed { next: Option<StepId> },
    /// The step ran and produced a failure for this contact.
    Failed { reason: String },
    /// The step is not done yet; re-check at `until`.
    Waiting { until: Timestamp },
}

/// A step whose configuration checked out for one contact.
pub struct PreparedStep<'a> {
    step: &'a AutomationStep,
    config: StepConfig,
    prepared: Prepared,
    executor: Arc<dyn StepExecutor>,
}

/// Dispatches steps to their executors.
#[derive(Clone)]
pub struct StepRunner {
    executors: HashMap<StepSubtype, Arc<dyn StepExecutor>>,
    automations: Arc<dyn AutomationStore>,
}

impl StepRunner {
    /// Builds the executor table.
    pub fn new(services: &Collaborators, config: &EngineConfig) -> Self {
        let executors = StepSubtype::iter()
            .map(|subtype| (subtype, executor_for(subtype, services, config)))
            .collect();

        Self {
            executors,
            automations: services.automations.clone(),
        }
    }

    /// Parses the step's configuration and resolves its inputs for
    /// `contact`.
    ///
    /// Malformed configuration is a fatal error. Nothing is written, so the
    /// caller may claim the ledger row only once this succeeds.
    pub async fn prepare<'a>(
        &self,
        step: &'a AutomationStep,
        contact: &Contact,
        now: Timestamp,
    ) -> RuntimeResult<PreparedStep<'a>> {
        let config = StepConfig::parse(step)?;
        let executor = self.executors.get(&step.subtype).cloned().ok_or_else(|| {
            RuntimeError::invalid_configuration(step.id, format!("no executor for {}", step.subtype))
        })?;
        let prepared = executor.prepare(step, &config, contact, now).await?;

        Ok(PreparedStep {
            step,
            config,
            prepared,
            executor,
        })
    }

    /// Runs a prepared step for `contact`, whose ledger row at the step is
    /// `entry`.
    pub async fn run(
        &self,
        prepared: &PreparedStep<'_>,
        contact: &Contact,
        entry: &LedgerEntry,
        now: Timestamp,
    ) -> RuntimeResult<StepOutcome> {
        let step = prepared.step;
        let context = ExecutionContext {
            step,
            config: &prepared.config,
            prepared: &prepared.prepared,
            contact,
            entry,
            now,
        };

        let effect = prepared.executor.execute(&context).await?;
        tracing::debug!(
            target: TRACING_TARGET_RUNNER,
            step_id = %step.id,
            contact_id = %contact.id,
            subtype = %step.subtype,
            effect = ?effect,
            "Step executed"
        );

        let outcome = match effect {
            Effect::Advance => StepOutcome::Completed {
                next: self.next_step(step.id, None).await?,
            },
            Effect::Branch(branch) => StepOutcome::Completed {
                next: self.next_step(step.id, Some(branch)).await?,
            },
            Effect::Finish => StepOutcome::Completed { next: None },
            Effect::Wait { until } => StepOutcome::Waiting { until },
            Effect::Fail { reason } => StepOutcome::Failed { reason },
        };

        Ok(outcome)
    }

    async fn next_step(
        &self,
        step_id: StepId,
        branch: Option<crate::model::Branch>,
    ) -> RuntimeResult<Option<StepId>> {
        let child = self.automations.find_child_step(step_id, branch).await?;
        Ok(child.map(|child| child.id))
    }
}

fn executor_for(
    subtype: StepSubtype,
    services: &Collaborators,
    config: &EngineConfig,
) -> Arc<dyn StepExecutor> {
    match subtype {
        StepSubtype::TriggerContactTagAdded
        | StepSubtype::TriggerContactTagRemoved
        | StepSubtype::TriggerContactSubscribed
        | StepSubtype::TriggerApiCall => Arc::new(TriggerExecutor),
        StepSubtype::ActionSendEmail => Arc::new(SendEmailExecutor::new(services.email.clone())),
        StepSubtype::ActionAddTag => Arc::new(TagExecutor::attach(services.contacts.clone())),
        StepSubtype::ActionRemoveTag => Arc::new(TagExecutor::detach(services.contacts.clone())),
        StepSubtype::ActionUpdateContactAttributes => {
            Arc::new(UpdateAttributesExecutor::new(services.contacts.clone()))
        }
        StepSubtype::RuleIfElse => Arc::new(IfElseExecutor::new(
            services.contacts.clone(),
            config.unknown_property_policy,
        )),
        StepSubtype::RuleWaitForDuration => Arc::new(WaitExecutor),
        StepSubtype::End => Arc::new(EndExecutor),
    }
}
