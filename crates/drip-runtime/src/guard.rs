//! Idempotency guard over the execution ledger.

use std::sync::Arc;

use crate::error::RuntimeResult;
use crate::ids::{ContactId, StepId};
use crate::model::{LedgerEntry, LedgerStatus};
use crate::store::{Clock, LedgerInsert, LedgerStore};

/// Outcome of claiming a `(contact, step)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The pair is pending; the caller may execute the step.
    Acquired(LedgerEntry),
    /// The pair already reached a terminal status.
    AlreadyRan(LedgerEntry),
}

/// Serializes execution of a `(contact, step)` pair through its ledger row.
///
/// A row is claimed (inserted as `PENDING` or found pending) before the
/// step's effect runs. Moving it to a terminal status is a compare-and-set,
/// so exactly one delivery records the outcome of a pair. A pending row does
/// not keep out a second live delivery of the same job; the transport must
/// not redeliver a job that is still being handled.
#[derive(Clone)]
pub struct IdempotencyGuard {
    ledger: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    /// Creates a guard over a ledger.
    pub fn new(ledger: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { ledger, clock }
    }

    /// Claims the pair for execution.
    pub async fn claim(&self, contact_id: ContactId, step_id: StepId) -> RuntimeResult<Claim> {
        if let Some(entry) = self.ledger.find_ledger_entry(contact_id, step_id).await? {
            return Ok(Self::classify(entry));
        }

        let insert = self
            .ledger
            .create_ledger_entry(contact_id, step_id, LedgerStatus::Pending, self.clock.now())
            .await?;

        Ok(match insert {
            LedgerInsert::Created(entry) => Claim::Acquired(entry),
            LedgerInsert::Existing(entry) => Self::classify(entry),
        })
    }

    /// Records a `PENDING` row for a contact arriving at a step.
    ///
    /// Returns the row unless the pair already finished.
    pub async fn enter(
        &self,
        contact_id: ContactId,
        step_id: StepId,
    ) -> RuntimeResult<Option<LedgerEntry>> {
        match self.claim(contact_id, step_id).await? {
            Claim::Acquired(entry) => Ok(Some(entry)),
            Claim::AlreadyRan(_) => Ok(None),
        }
    }

    /// Marks a claimed row completed; `false` if another delivery won.
    pub async fn complete(&self, entry: &LedgerEntry) -> RuntimeResult<bool> {
        self.finish(entry, LedgerStatus::Completed).await
    }

    /// Marks a claimed row failed; `false` if another delivery won.
    pub async fn fail(&self, entry: &LedgerEntry) -> RuntimeResult<bool> {
        self.finish(entry, LedgerStatus::Failed).await
    }

    async fn finish(&self, entry: &LedgerEntry, status: LedgerStatus) -> RuntimeResult<bool> {
        self.ledger
            .transition_ledger_status(entry.id, LedgerStatus::Pending, status, self.clock.now())
            .await
    }

    fn classify(entry: LedgerEntry) -> Claim {
        if entry.status.is_terminal() {
            Claim::AlreadyRan(entry)
        } else {
            Claim::Acquired(entry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ManualClock, MemoryLedgerStore};

    fn guard() -> (IdempotencyGuard, Arc<MemoryLedgerStore>) {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new("2024-01-01T00:00:00Z".parse().unwrap()));
        (IdempotencyGuard::new(ledger.clone(), clock), ledger)
    }

    #[tokio::test]
    async fn test_claim_then_already_ran() {
        let (guard, ledger) = guard();
        let (contact, step) = (ContactId::new(), StepId::new());

        let Claim::Acquired(entry) = guard.claim(contact, step).await.unwrap() else {
            panic!("first claim must acquire");
        };
        assert!(guard.complete(&entry).await.unwrap());

        assert!(matches!(
            guard.claim(contact, step).await.unwrap(),
            Claim::AlreadyRan(_)
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_row_is_reclaimed() {
        let (guard, ledger) = guard();
        let (contact, step) = (ContactId::new(), StepId::new());

        let first = guard.enter(contact, step).await.unwrap().unwrap();
        let Claim::Acquired(second) = guard.claim(contact, step).await.unwrap() else {
            panic!("pending rows stay claimable");
        };
        assert_eq!(first.id, second.id);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_only_one_delivery_finishes() {
        let (guard, _) = guard();
        let entry = guard.enter(ContactId::new(), StepId::new()).await.unwrap().unwrap();

        assert!(guard.complete(&entry).await.unwrap());
        assert!(!guard.complete(&entry).await.unwrap());
        assert!(!guard.fail(&entry).await.unwrap());
    }
}
