//! Cohort advancement.
//!
//! The scheduler owns two ways a contact moves forward: scheduling one
//! contact at a step ([`Scheduler::schedule`]) and sweeping every contact
//! still pending at a step ([`Scheduler::advance`]). Sweeps page through the
//! ledger with a keyset cursor, so a crashed sweep is resumed by simply
//! running it again.

use std::sync::Arc;
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};

use crate::TRACING_TARGET_SCHEDULER;
use crate::config::EngineConfig;
use crate::engine::Collaborators;
use crate::error::{RuntimeError, RuntimeResult};
use crate::guard::IdempotencyGuard;
use crate::ids::{ContactId, StepId};
use crate::jobs::{AutomationJob, EnqueueOptions, JobEntry};
use crate::model::{AutomationStep, LedgerEntry};
use crate::step::StepConfig;
use crate::store::{AutomationStore, Clock, JobQueue, LedgerStore};

/// Summary of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ledger pages read.
    pub pages: usize,
    /// Per-contact jobs enqueued.
    pub enqueued: usize,
    /// Pending contacts whose wait has not elapsed.
    pub deferred: usize,
    /// Whether a follow-up sweep was enqueued.
    pub rescheduled: bool,
}

/// Schedules contacts at steps.
#[derive(Clone)]
pub struct Scheduler {
    automations: Arc<dyn AutomationStore>,
    ledger: Arc<dyn LedgerStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard,
    page_size: usize,
    recheck_interval: Duration,
    max_sweep_attempts: u32,
    job_attempts: u32,
}

impl Scheduler {
    pub fn new(services: &Collaborators, config: &EngineConfig) -> Self {
        Self {
            automations: services.automations.clone(),
            ledger: services.ledger.clone(),
            queue: services.queue.clone(),
            clock: services.clock.clone(),
            guard: IdempotencyGuard::new(services.ledger.clone(), services.clock.clone()),
            page_size: config.sweep_page_size,
            recheck_interval: config.wait_recheck_interval,
            max_sweep_attempts: config.max_sweep_attempts,
            job_attempts: config.job_attempts,
        }
    }

    /// Records the contact as pending at `step_id` and enqueues its execution.
    ///
    /// Returns `false` when the contact already finished the step.
    pub async fn schedule(&self, contact_id: ContactId, step_id: StepId) -> RuntimeResult<bool> {
        let Some(entry) = self.guard.enter(contact_id, step_id).await? else {
            tracing::debug!(
                target: TRACING_TARGET_SCHEDULER,
                contact_id = %contact_id,
                step_id = %step_id,
                "Contact already finished step"
            );
            return Ok(false);
        };

        self.queue
            .enqueue(Self::step_job(&entry), self.job_options())
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_SCHEDULER,
            contact_id = %contact_id,
            step_id = %step_id,
            "Contact scheduled"
        );
        Ok(true)
    }

    /// Enqueues a sweep of `step_id` to run at `until`.
    pub async fn schedule_sweep(&self, step_id: StepId, until: Timestamp) -> RuntimeResult<()> {
        let delay = positive_delay(until.duration_since(self.clock.now()));
        let job = AutomationJob::RunAutomationStep {
            automation_step_id: step_id,
            attempt: 0,
        };
        self.queue
            .enqueue(job, self.job_options().with_delay(delay))
            .await
    }

    /// Enqueues one per-contact job for every contact pending at the step.
    ///
    /// For wait steps only contacts whose delay has elapsed are enqueued;
    /// if others remain, the sweep re-enqueues itself with `attempt + 1`
    /// until the attempt ceiling is reached.
    pub async fn advance(&self, step_id: StepId, attempt: u32) -> RuntimeResult<SweepReport> {
        let step = self
            .automations
            .find_step(step_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("step", step_id))?;
        let delay = Self::wait_delay(&step)?;
        let now = self.clock.now();

        let mut report = SweepReport::default();
        let mut next_due: Option<Timestamp> = None;
        let mut cursor = None;

        loop {
            let page = self
                .ledger
                .find_pending_contacts_for_step(step_id, cursor, self.page_size)
                .await?;
            report.pages += 1;

            let mut jobs = Vec::with_capacity(page.entries.len());
            for entry in &page.entries {
                match due_at(entry, delay) {
                    Some(due) if due > now => {
                        report.deferred += 1;
                        next_due = Some(next_due.map_or(due, |current| current.min(due)));
                    }
                    _ => jobs.push(JobEntry::new(Self::step_job(entry), self.job_options())),
                }
            }

            let enqueued = jobs.len();
            if !jobs.is_empty() {
                self.queue.enqueue_bulk(jobs).await?;
            }
            report.enqueued += enqueued;

            tracing::debug!(
                target: TRACING_TARGET_SCHEDULER,
                step_id = %step_id,
                page = report.pages,
                enqueued,
                "Sweep page processed"
            );

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        if let Some(due) = next_due {
            report.rescheduled = self.reschedule(step_id, attempt, now, due).await?;
        }

        tracing::info!(
            target: TRACING_TARGET_SCHEDULER,
            step_id = %step_id,
            attempt,
            pages = report.pages,
            enqueued = report.enqueued,
            deferred = report.deferred,
            "Sweep finished"
        );
        Ok(report)
    }

    async fn reschedule(
        &self,
        step_id: StepId,
        attempt: u32,
        now: Timestamp,
        next_due: Timestamp,
    ) -> RuntimeResult<bool> {
        let next_attempt = attempt.saturating_add(1);
        if next_attempt >= self.max_sweep_attempts {
            tracing::warn!(
                target: TRACING_TARGET_SCHEDULER,
                step_id = %step_id,
                attempt,
                "Sweep attempt ceiling reached with contacts still waiting"
            );
            return Ok(false);
        }

        let delay = positive_delay(next_due.duration_since(now)).min(self.recheck_interval);
        let job = AutomationJob::RunAutomationStep {
            automation_step_id: step_id,
            attempt: next_attempt,
        };
        self.queue
            .enqueue(job, self.job_options().with_delay(delay))
            .await?;
        Ok(true)
    }

    fn wait_delay(step: &AutomationStep) -> RuntimeResult<Option<SignedDuration>> {
        match StepConfig::parse(step)? {
            StepConfig::Wait(config) => config
                .duration()
                .map(Some)
                .ok_or_else(|| RuntimeError::invalid_configuration(step.id, "delay out of range")),
            _ => Ok(None),
        }
    }

    fn step_job(entry: &LedgerEntry) -> AutomationJob {
        AutomationJob::RunAutomationStepForContact {
            automation_step_id: entry.step_id,
            contact_id: entry.contact_id,
        }
    }

    fn job_options(&self) -> EnqueueOptions {
        EnqueueOptions::default().with_attempts(self.job_attempts)
    }
}

fn due_at(entry: &LedgerEntry, delay: Option<SignedDuration>) -> Option<Timestamp> {
    let delay = delay?;
    // Unrepresentable deadlines never come due.
    Some(entry.created_at.checked_add(delay).unwrap_or(Timestamp::MAX))
}

fn positive_delay(duration: SignedDuration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::EngineConfigBuilder;
    use crate::ids::AutomationId;
    use crate::memory::MemoryServices;
    use crate::model::{LedgerStatus, StepSubtype};

    fn scheduler(services: &MemoryServices, page_size: usize) -> Scheduler {
        let config = EngineConfigBuilder::default()
            .sweep_page_size(page_size)
            .build()
            .unwrap();
        Scheduler::new(&services.collaborators(), &config)
    }

    async fn pending_step(services: &MemoryServices, contacts: usize) -> AutomationStep {
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::ActionAddTag)
            .with_parent(StepId::new())
            .with_tag(crate::ids::TagId::new());
        services.automations.insert_step(step.clone());

        let now = services.clock.now();
        for _ in 0..contacts {
            services
                .ledger
                .create_ledger_entry(ContactId::new(), step.id, LedgerStatus::Pending, now)
                .await
                .unwrap();
        }
        step
    }

    fn swept_contacts(services: &MemoryServices) -> Vec<ContactId> {
        services
            .queue
            .pending_jobs()
            .into_iter()
            .filter_map(|job| match job {
                AutomationJob::RunAutomationStepForContact { contact_id, .. } => Some(contact_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fan_out_is_complete_for_any_page_size() {
        for (contacts, page_size) in [(0, 3), (1, 3), (3, 3), (7, 3), (10, 1), (5, 75)] {
            let services = MemoryServices::new();
            let step = pending_step(&services, contacts).await;

            let report = scheduler(&services, page_size)
                .advance(step.id, 0)
                .await
                .unwrap();

            assert_eq!(report.enqueued, contacts, "K={contacts} P={page_size}");
            let mut swept = swept_contacts(&services);
            swept.sort();
            swept.dedup();
            assert_eq!(swept.len(), contacts);
            assert!(!report.rescheduled);
        }
    }

    #[tokio::test]
    async fn test_resume_after_partial_sweep_skips_advanced_contacts() {
        let services = MemoryServices::new();
        let step = pending_step(&services, 7).await;
        let ledger = services.ledger.clone();

        // The first page was advanced before the sweep crashed.
        let first = ledger
            .find_pending_contacts_for_step(step.id, None, 3)
            .await
            .unwrap();
        let now = services.clock.now();
        for entry in &first.entries {
            ledger
                .transition_ledger_status(entry.id, LedgerStatus::Pending, LedgerStatus::Completed, now)
                .await
                .unwrap();
        }

        let report = scheduler(&services, 3).advance(step.id, 0).await.unwrap();
        assert_eq!(report.enqueued, 4);

        let advanced: Vec<_> = first.entries.iter().map(|entry| entry.contact_id).collect();
        let swept = swept_contacts(&services);
        assert!(swept.iter().all(|contact| !advanced.contains(contact)));
        assert_eq!(ledger.len(), 7);
    }

    #[tokio::test]
    async fn test_wait_sweep_defers_and_reschedules() {
        let services = MemoryServices::new();
        let wait = AutomationStep::new(AutomationId::new(), StepSubtype::RuleWaitForDuration)
            .with_parent(StepId::new())
            .with_configuration(json!({ "delay": 1, "unit": "hours" }));
        services.automations.insert_step(wait.clone());

        let early = ContactId::new();
        let late = ContactId::new();
        let start = services.clock.now();
        services
            .ledger
            .create_ledger_entry(early, wait.id, LedgerStatus::Pending, start)
            .await
            .unwrap();
        services.clock.advance(Duration::from_secs(30 * 60));
        services
            .ledger
            .create_ledger_entry(late, wait.id, LedgerStatus::Pending, services.clock.now())
            .await
            .unwrap();
        services.clock.advance(Duration::from_secs(31 * 60));

        let report = scheduler(&services, 75).advance(wait.id, 0).await.unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.deferred, 1);
        assert!(report.rescheduled);
        assert_eq!(swept_contacts(&services), vec![early]);

        let resweep = services.queue.pending_jobs().into_iter().any(|job| {
            matches!(job, AutomationJob::RunAutomationStep { attempt: 1, .. })
        });
        assert!(resweep);
    }

    #[tokio::test]
    async fn test_wait_sweep_stops_at_ceiling() {
        let services = MemoryServices::new();
        let wait = AutomationStep::new(AutomationId::new(), StepSubtype::RuleWaitForDuration)
            .with_parent(StepId::new())
            .with_configuration(json!({ "delay": 1, "unit": "days" }));
        services.automations.insert_step(wait.clone());
        services
            .ledger
            .create_ledger_entry(ContactId::new(), wait.id, LedgerStatus::Pending, services.clock.now())
            .await
            .unwrap();

        let report = scheduler(&services, 75).advance(wait.id, 19).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert!(!report.rescheduled);
    }

    #[tokio::test]
    async fn test_missing_step_is_benign() {
        let services = MemoryServices::new();
        let error = scheduler(&services, 75)
            .advance(StepId::new(), 0)
            .await
            .unwrap_err();
        assert!(error.is_benign());
    }

    #[tokio::test]
    async fn test_schedule_skips_finished_pair() {
        let services = MemoryServices::new();
        let scheduler = scheduler(&services, 75);
        let (contact, step) = (ContactId::new(), StepId::new());

        assert!(scheduler.schedule(contact, step).await.unwrap());
        let entry = services
            .ledger
            .find_ledger_entry(contact, step)
            .await
            .unwrap()
            .unwrap();
        services
            .ledger
            .update_ledger_status(entry.id, LedgerStatus::Completed, services.clock.now())
            .await
            .unwrap();

        assert!(!scheduler.schedule(contact, step).await.unwrap());
        assert_eq!(services.queue.pending_jobs().len(), 1);
    }
}
