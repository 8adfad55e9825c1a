//! Executor contract.

use async_trait::async_trait;
use drip_filter::Predicate;
use jiff::{SignedDuration, Timestamp};

use crate::error::RuntimeResult;
use crate::model::{AutomationStep, Branch, Contact, LedgerEntry};
use crate::step::StepConfig;

/// Inputs resolved by [`StepExecutor::prepare`].
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    /// The parsed configuration is all the step needs.
    Nothing,
    /// Filter compiled against the contact's audience.
    Filter(Predicate),
    /// Wait delay.
    Delay(SignedDuration),
}

/// Inputs of one execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub step: &'a AutomationStep,
    pub config: &'a StepConfig,
    pub prepared: &'a Prepared,
    pub contact: &'a Contact,
    /// The contact's ledger row at this step.
    pub entry: &'a LedgerEntry,
    pub now: Timestamp,
}

/// What an executor asks the runner to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Continue to the unlabeled child.
    Advance,
    /// Continue to the child on the branch.
    Branch(Branch),
    /// The contact's path ends here.
    Finish,
    /// Not done; re-check at `until`.
    Wait { until: Timestamp },
    /// The step failed for this contact.
    Fail { reason: String },
}

/// Executes one step subtype.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Resolves everything about the step that can be wrong independently
    /// of its effect.
    ///
    /// Called before the contact's ledger row is claimed, so an error here
    /// leaves the ledger untouched.
    async fn prepare(
        &self,
        _step: &AutomationStep,
        _config: &StepConfig,
        _contact: &Contact,
        _now: Timestamp,
    ) -> RuntimeResult<Prepared> {
        Ok(Prepared::Nothing)
    }

    /// Performs the step's effect for the contact.
    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect>;
}
