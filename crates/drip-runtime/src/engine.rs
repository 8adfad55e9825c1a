//! Automation engine: the job handler and the step write path.

use std::sync::Arc;

use drip_filter::{AudienceContext, FilterGroups};
use futures::stream::BoxStream;
use strum::{Display, IntoStaticStr};
use tokio::sync::Semaphore;

use crate::TRACING_TARGET_ENGINE;
use crate::config::EngineConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::AutomationGraph;
use crate::guard::{Claim, IdempotencyGuard};
use crate::ids::{AudienceId, AutomationId, ContactId, StepId};
use crate::jobs::{AutomationJob, EnqueueOptions, TriggerEvent};
use crate::model::{AutomationStep, Contact};
use crate::runner::{StepOutcome, StepRunner};
use crate::scheduler::{Scheduler, SweepReport};
use crate::step::{validate_automation, validate_step};
use crate::store::{AutomationStore, Clock, ContactStore, EmailSender, JobQueue, LedgerStore};

/// Collaborators injected into the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub contacts: Arc<dyn ContactStore>,
    pub automations: Arc<dyn AutomationStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub queue: Arc<dyn JobQueue>,
    pub email: Arc<dyn EmailSender>,
    pub clock: Arc<dyn Clock>,
}

/// Why a job finished without doing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    ContactNotFound,
    StepNotFound,
    AutomationNotFound,
    AutomationInactive,
    AudienceMismatch,
    TriggerNotFound,
    /// The contact's ledger row at the step is already terminal.
    AlreadyRan,
    /// The contact already entered the automation.
    AlreadyTriggered,
    /// The trigger's filter rejected the contact, or no trigger matched.
    NotMatched,
    /// Another delivery recorded the step's outcome first.
    Superseded,
    /// A referenced entity disappeared while the job ran.
    Gone,
}

/// Terminal result of handling one job; both variants acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Done,
    Skipped(SkipReason),
}

/// The automation engine.
///
/// Stateless between jobs: every durable fact lives behind the injected
/// collaborators, so any number of engines may consume the same queue.
/// Within one engine, concurrent [`handle`](Self::handle) calls are bounded
/// by `max_concurrent_jobs`.
#[derive(Clone)]
pub struct Engine {
    config: EngineConfig,
    semaphore: Arc<Semaphore>,
    services: Collaborators,
    runner: StepRunner,
    guard: IdempotencyGuard,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
}

impl Engine {
    /// Creates an engine over the given collaborators.
    pub fn new(config: EngineConfig, services: Collaborators) -> Self {
        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            max_concurrent_jobs = config.max_concurrent_jobs,
            sweep_page_size = config.sweep_page_size,
            job_attempts = config.job_attempts,
            unknown_property_policy = ?config.unknown_property_policy,
            "Automation engine initialized"
        );

        Self {
            runner: StepRunner::new(&services, &config),
            guard: IdempotencyGuard::new(services.ledger.clone(), services.clock.clone()),
            scheduler: Scheduler::new(&services, &config),
            dispatcher: Dispatcher::new(&services, &config),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            config,
            services,
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the injected collaborators.
    pub fn services(&self) -> &Collaborators {
        &self.services
    }

    /// Handles one job.
    ///
    /// Benign errors (something was deleted after the job was queued) are
    /// absorbed into [`JobOutcome::Skipped`]. Transient errors are returned
    /// for the queue to retry; fatal errors are returned for the queue to
    /// drop. In both cases the ledger row of the step in flight is left as
    /// it was.
    pub async fn handle(&self, job: AutomationJob) -> RuntimeResult<JobOutcome> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| RuntimeError::queue(format!("semaphore closed: {e}")))?;

        let name = job.name();
        let contact_id = job.contact_id();

        let result = match job {
            AutomationJob::RunAutomationForContact {
                automation_id,
                contact_id,
            } => self.run_automation_for_contact(automation_id, contact_id).await,
            AutomationJob::RunAutomationStepForContact {
                automation_step_id,
                contact_id,
            } => self.run_step_for_contact(automation_step_id, contact_id).await,
            AutomationJob::RunAutomationStep {
                automation_step_id,
                attempt,
            } => self
                .advance(automation_step_id, attempt)
                .await
                .map(|_| JobOutcome::Done),
            AutomationJob::TriggerAutomationsForContact {
                contact_id,
                trigger,
            } => self.trigger_for_contact(contact_id, &trigger).await,
        };

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    job = name,
                    contact_id = ?contact_id,
                    outcome = ?outcome,
                    "Job handled"
                );
                Ok(outcome)
            }
            Err(error) if error.is_benign() => {
                tracing::info!(
                    target: TRACING_TARGET_ENGINE,
                    job = name,
                    contact_id = ?contact_id,
                    error = %error,
                    "Job target no longer exists"
                );
                Ok(JobOutcome::Skipped(SkipReason::Gone))
            }
            Err(error) if error.is_transient() => {
                tracing::warn!(
                    target: TRACING_TARGET_ENGINE,
                    job = name,
                    contact_id = ?contact_id,
                    error = %error,
                    "Job failed, will be retried"
                );
                Err(error)
            }
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET_ENGINE,
                    job = name,
                    contact_id = ?contact_id,
                    error = %error,
                    "Job failed permanently"
                );
                Err(error)
            }
        }
    }

    /// Executes one step for one contact under the idempotency guard.
    ///
    /// The successor is scheduled before the current row is completed, so a
    /// crash in between leaves the current row pending and a redelivery
    /// finishes the transition.
    pub async fn run_step_for_contact(
        &self,
        step_id: StepId,
        contact_id: ContactId,
    ) -> RuntimeResult<JobOutcome> {
        let Some(step) = self.services.automations.find_step(step_id).await? else {
            return Ok(JobOutcome::Skipped(SkipReason::StepNotFound));
        };
        let Some(contact) = self.services.contacts.find_by_id(contact_id).await? else {
            return Ok(JobOutcome::Skipped(SkipReason::ContactNotFound));
        };

        // Corrupt configuration is fatal and must leave the ledger alone.
        validate_step(&step)?;
        let prepared = self
            .runner
            .prepare(&step, &contact, self.services.clock.now())
            .await?;

        let entry = match self.guard.claim(contact.id, step.id).await? {
            Claim::Acquired(entry) => entry,
            Claim::AlreadyRan(entry) => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    contact_id = %contact.id,
                    step_id = %step.id,
                    status = %entry.status,
                    "Step already ran for contact"
                );
                return Ok(JobOutcome::Skipped(SkipReason::AlreadyRan));
            }
        };

        let now = self.services.clock.now();
        let outcome = self.runner.run(&prepared, &contact, &entry, now).await?;

        match outcome {
            StepOutcome::Completed { next } => {
                if let Some(next) = next {
                    self.scheduler.schedule(contact.id, next).await?;
                }
                if !self.guard.complete(&entry).await? {
                    return Ok(JobOutcome::Skipped(SkipReason::Superseded));
                }
            }
            StepOutcome::Failed { reason } => {
                tracing::warn!(
                    target: TRACING_TARGET_ENGINE,
                    contact_id = %contact.id,
                    step_id = %step.id,
                    automation_id = %step.automation_id,
                    reason = %reason,
                    "Step failed for contact"
                );
                if !self.guard.fail(&entry).await? {
                    return Ok(JobOutcome::Skipped(SkipReason::Superseded));
                }
            }
            StepOutcome::Waiting { until } => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    contact_id = %contact.id,
                    step_id = %step.id,
                    until = %until,
                    "Contact waiting at step"
                );
                self.scheduler.schedule_sweep(step.id, until).await?;
            }
        }

        Ok(JobOutcome::Done)
    }

    /// Sweeps every contact pending at a step.
    pub async fn advance(&self, step_id: StepId, attempt: u32) -> RuntimeResult<SweepReport> {
        self.scheduler.advance(step_id, attempt).await
    }

    /// Dispatches a trigger event for one contact.
    pub async fn on_event(
        &self,
        contact_id: ContactId,
        event: &TriggerEvent,
    ) -> RuntimeResult<DispatchReport> {
        let contact = self.load_contact(contact_id).await?;
        self.dispatcher.on_event(&contact, event).await
    }

    /// Enqueues a trigger event for asynchronous dispatch.
    pub async fn publish_event(
        &self,
        contact_id: ContactId,
        event: TriggerEvent,
    ) -> RuntimeResult<()> {
        let job = AutomationJob::TriggerAutomationsForContact {
            contact_id,
            trigger: event,
        };
        self.services
            .queue
            .enqueue(job, EnqueueOptions::default().with_attempts(self.config.job_attempts))
            .await
    }

    /// Validates a step and its automation, then persists it.
    ///
    /// The step replaces any stored step with the same id.
    pub async fn save_step(&self, step: AutomationStep) -> RuntimeResult<AutomationGraph> {
        let automation = self
            .services
            .automations
            .find_automation(step.automation_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("automation", step.automation_id))?;
        let properties = self
            .services
            .contacts
            .known_properties(automation.audience_id)
            .await?;

        let mut steps = self
            .services
            .automations
            .steps_for_automation(automation.id)
            .await?;
        steps.retain(|existing| existing.id != step.id);
        steps.push(step.clone());

        let graph = validate_automation(steps, &properties)?;
        self.services.automations.save_step(step.clone()).await?;

        tracing::info!(
            target: TRACING_TARGET_ENGINE,
            automation_id = %automation.id,
            step_id = %step.id,
            subtype = %step.subtype,
            "Automation step saved"
        );
        Ok(graph)
    }

    /// Streams the audience's contacts matching a segment filter.
    pub async fn segment_contacts(
        &self,
        audience_id: AudienceId,
        groups: &FilterGroups,
    ) -> RuntimeResult<BoxStream<'static, RuntimeResult<Contact>>> {
        groups.validate()?;
        let properties = self.services.contacts.known_properties(audience_id).await?;
        let context = AudienceContext::new(self.services.clock.now())
            .with_properties(properties)
            .with_unknown_property_policy(self.config.unknown_property_policy);
        let predicate = drip_filter::compile(groups, &context)?;

        self.services
            .contacts
            .find_matching(audience_id, &predicate)
            .await
    }

    async fn run_automation_for_contact(
        &self,
        automation_id: AutomationId,
        contact_id: ContactId,
    ) -> RuntimeResult<JobOutcome> {
        let Some(contact) = self.services.contacts.find_by_id(contact_id).await? else {
            return Ok(JobOutcome::Skipped(SkipReason::ContactNotFound));
        };
        self.dispatcher.run_automation(automation_id, &contact).await
    }

    async fn trigger_for_contact(
        &self,
        contact_id: ContactId,
        event: &TriggerEvent,
    ) -> RuntimeResult<JobOutcome> {
        let Some(contact) = self.services.contacts.find_by_id(contact_id).await? else {
            return Ok(JobOutcome::Skipped(SkipReason::ContactNotFound));
        };

        let report = self.dispatcher.on_event(&contact, event).await?;
        Ok(if report.started.is_empty() {
            JobOutcome::Skipped(SkipReason::NotMatched)
        } else {
            JobOutcome::Done
        })
    }

    async fn load_contact(&self, contact_id: ContactId) -> RuntimeResult<Contact> {
        self.services
            .contacts
            .find_by_id(contact_id)
            .await?
            .ok_or_else(|| RuntimeError::not_found("contact", contact_id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use drip_filter::{PropertyKind, PropertyValue};
    use futures::TryStreamExt;
    use serde_json::{Value, json};

    use super::*;
    use crate::memory::{self, MemoryServices, TagCall};
    use crate::model::{Automation, AutomationStatus, Branch, ContactStatus, LedgerStatus, StepSubtype};
    use crate::store::LedgerStore;
    use crate::{EngineConfigBuilder, EmailId, TagId};

    fn engine(services: &MemoryServices) -> Engine {
        Engine::new(EngineConfig::default(), services.collaborators())
    }

    fn filter_on_tag(tag: TagId) -> Value {
        json!({
            "filterGroups": {
                "operator": "AND",
                "groups": [{
                    "operator": "AND",
                    "conditions": [{ "field": "tags", "operator": "contains", "value": [tag] }]
                }]
            }
        })
    }

    fn active_automation(services: &MemoryServices) -> Automation {
        let automation =
            Automation::new(AudienceId::new(), "journey").with_status(AutomationStatus::Active);
        services.automations.insert_automation(automation.clone());
        automation
    }

    struct TagScenario {
        services: MemoryServices,
        engine: Engine,
        automation: Automation,
        steps: [AutomationStep; 4],
        tags: [TagId; 3],
    }

    /// Tag A or B added, then `IF tags contains A`: YES adds C, NO ends.
    async fn tag_scenario() -> TagScenario {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let automation = active_automation(&services);
        let tags = [TagId::new(), TagId::new(), TagId::new()];
        let [a, b, c] = tags;

        let trigger = AutomationStep::new(automation.id, StepSubtype::TriggerContactTagAdded)
            .with_configuration(json!({ "tagIds": [a, b] }));
        let rule = AutomationStep::new(automation.id, StepSubtype::RuleIfElse)
            .with_parent(trigger.id)
            .with_configuration(filter_on_tag(a));
        let add_tag = AutomationStep::new(automation.id, StepSubtype::ActionAddTag)
            .with_branch(rule.id, Branch::Yes)
            .with_tag(c);
        let end = AutomationStep::new(automation.id, StepSubtype::End)
            .with_branch(rule.id, Branch::No);

        for step in [&trigger, &rule, &add_tag, &end] {
            engine.save_step(step.clone()).await.unwrap();
        }

        TagScenario {
            services,
            engine,
            automation,
            steps: [trigger, rule, add_tag, end],
            tags,
        }
    }

    impl TagScenario {
        fn contact(&self, tags: &[TagId]) -> Contact {
            let contact = Contact::new(self.automation.audience_id, "someone@example.com")
                .with_tags(tags.iter().copied());
            self.services.contacts.insert(contact.clone());
            contact
        }

        async fn fire(&self, contact: &Contact, tag: TagId) -> memory::DrainReport {
            self.engine
                .publish_event(contact.id, TriggerEvent::tag_added(tag))
                .await
                .unwrap();
            memory::drain(&self.engine, &self.services.queue, &self.services.clock, 1_000)
                .await
                .unwrap()
        }

        fn statuses(&self, contact: &Contact) -> Vec<Option<LedgerStatus>> {
            self.steps
                .iter()
                .map(|step| {
                    self.services
                        .ledger
                        .entry(contact.id, step.id)
                        .map(|entry| entry.status)
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_matching_contact_takes_yes_branch() {
        let scenario = tag_scenario().await;
        let [a, _, c] = scenario.tags;
        let contact = scenario.contact(&[a]);

        let report = scenario.fire(&contact, a).await;
        assert_eq!(report.dropped, 0);

        let stored = scenario.services.contacts.get(contact.id).unwrap();
        assert!(stored.has_tag(c));
        let done = Some(LedgerStatus::Completed);
        assert_eq!(scenario.statuses(&contact), vec![done, done, done, None]);
    }

    #[tokio::test]
    async fn test_non_matching_contact_takes_no_branch() {
        let scenario = tag_scenario().await;
        let [_, b, c] = scenario.tags;
        let contact = scenario.contact(&[b]);

        scenario.fire(&contact, b).await;

        let stored = scenario.services.contacts.get(contact.id).unwrap();
        assert!(!stored.has_tag(c));
        let done = Some(LedgerStatus::Completed);
        assert_eq!(scenario.statuses(&contact), vec![done, done, None, done]);
        assert!(scenario.services.contacts.tag_calls().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_event_does_not_retrigger() {
        let scenario = tag_scenario().await;
        let [a, _, _] = scenario.tags;
        let contact = scenario.contact(&[a]);

        scenario.fire(&contact, a).await;
        let rows = scenario.services.ledger.len();
        let report = scenario.fire(&contact, a).await;

        assert_eq!(scenario.services.ledger.len(), rows);
        assert_eq!(report.skipped, 1);
        assert_eq!(scenario.services.contacts.tag_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_save_step_rejects_invalid_graph() {
        let scenario = tag_scenario().await;
        let [_, rule, _, _] = &scenario.steps;

        let second_trigger =
            AutomationStep::new(scenario.automation.id, StepSubtype::TriggerApiCall);
        let error = scenario.engine.save_step(second_trigger).await.unwrap_err();
        assert!(matches!(error, RuntimeError::InvalidGraph(_)));

        let third_branch = AutomationStep::new(scenario.automation.id, StepSubtype::End)
            .with_branch(rule.id, Branch::Yes);
        assert!(scenario.engine.save_step(third_branch).await.is_err());

        let orphan = AutomationStep::new(scenario.automation.id, StepSubtype::End)
            .with_parent(StepId::new());
        assert!(scenario.engine.save_step(orphan).await.is_err());

        let unknown = AutomationStep::new(AutomationId::new(), StepSubtype::TriggerApiCall);
        assert!(scenario.engine.save_step(unknown).await.unwrap_err().is_benign());
    }

    #[tokio::test]
    async fn test_double_delivery_runs_effect_once() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let tag = TagId::new();
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::ActionAddTag)
            .with_parent(StepId::new())
            .with_tag(tag);
        services.automations.insert_step(step.clone());
        let contact = Contact::new(AudienceId::new(), "a@example.com");
        services.contacts.insert(contact.clone());

        let job = AutomationJob::RunAutomationStepForContact {
            automation_step_id: step.id,
            contact_id: contact.id,
        };
        assert_eq!(engine.handle(job.clone()).await.unwrap(), JobOutcome::Done);
        assert_eq!(
            engine.handle(job).await.unwrap(),
            JobOutcome::Skipped(SkipReason::AlreadyRan)
        );

        assert_eq!(services.ledger.len(), 1);
        assert_eq!(
            services.contacts.tag_calls(),
            vec![TagCall::Attach {
                contact_id: contact.id,
                tag_ids: vec![tag],
            }]
        );
    }

    #[tokio::test]
    async fn test_wait_then_email() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let automation = active_automation(&services);
        let email = EmailId::new();

        let trigger = AutomationStep::new(automation.id, StepSubtype::TriggerApiCall);
        let wait = AutomationStep::new(automation.id, StepSubtype::RuleWaitForDuration)
            .with_parent(trigger.id)
            .with_configuration(json!({ "delay": 1, "unit": "hours" }));
        let send = AutomationStep::new(automation.id, StepSubtype::ActionSendEmail)
            .with_parent(wait.id)
            .with_email(email);
        for step in [&trigger, &wait, &send] {
            engine.save_step(step.clone()).await.unwrap();
        }

        let contact = Contact::new(automation.audience_id, "a@example.com");
        services.contacts.insert(contact.clone());
        let start = services.clock.now();

        let job = AutomationJob::RunAutomationForContact {
            automation_id: automation.id,
            contact_id: contact.id,
        };
        assert_eq!(engine.handle(job).await.unwrap(), JobOutcome::Done);
        memory::drain(&engine, &services.queue, &services.clock, 100)
            .await
            .unwrap();

        assert_eq!(services.email.sent(), vec![(email, contact.id)]);
        assert!(services.clock.now() >= start + jiff::SignedDuration::from_hours(1));
        for step in [&trigger, &wait, &send] {
            let entry = services.ledger.entry(contact.id, step.id).unwrap();
            assert_eq!(entry.status, LedgerStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_unmailable_contact_fails_step() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let send = AutomationStep::new(AutomationId::new(), StepSubtype::ActionSendEmail)
            .with_parent(StepId::new())
            .with_email(EmailId::new());
        let after = AutomationStep::new(send.automation_id, StepSubtype::End).with_parent(send.id);
        services.automations.insert_step(send.clone());
        services.automations.insert_step(after.clone());

        let mut contact = Contact::new(AudienceId::new(), "gone@example.com");
        contact.status = ContactStatus::Unsubscribed;
        services.contacts.insert(contact.clone());

        let outcome = engine.run_step_for_contact(send.id, contact.id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Done);

        let entry = services.ledger.entry(contact.id, send.id).unwrap();
        assert_eq!(entry.status, LedgerStatus::Failed);
        assert!(services.ledger.entry(contact.id, after.id).is_none());
        assert!(services.email.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transient_email_failure_is_retried() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let send = AutomationStep::new(AutomationId::new(), StepSubtype::ActionSendEmail)
            .with_parent(StepId::new())
            .with_email(EmailId::new());
        services.automations.insert_step(send.clone());
        let contact = Contact::new(AudienceId::new(), "a@example.com");
        services.contacts.insert(contact.clone());
        services.email.fail_next(1);

        let scheduler = Scheduler::new(&services.collaborators(), engine.config());
        scheduler.schedule(contact.id, send.id).await.unwrap();
        let report = memory::drain(&engine, &services.queue, &services.clock, 10)
            .await
            .unwrap();

        assert_eq!(report.retried, 1);
        assert_eq!(report.done, 1);
        assert_eq!(services.email.sent().len(), 1);
        let entry = services.ledger.entry(contact.id, send.id).unwrap();
        assert_eq!(entry.status, LedgerStatus::Completed);
    }

    #[tokio::test]
    async fn test_corrupt_step_is_fatal_and_leaves_ledger_alone() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let rule = AutomationStep::new(AutomationId::new(), StepSubtype::RuleIfElse)
            .with_parent(StepId::new())
            .with_configuration(json!({ "filterGroups": "oops" }));
        services.automations.insert_step(rule.clone());
        let contact = Contact::new(AudienceId::new(), "a@example.com");
        services.contacts.insert(contact.clone());

        let error = engine
            .handle(AutomationJob::RunAutomationStepForContact {
                automation_step_id: rule.id,
                contact_id: contact.id,
            })
            .await
            .unwrap_err();

        assert!(error.is_fatal());
        assert!(services.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_filter_type_mismatch_is_fatal_and_leaves_ledger_alone() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let automation = active_automation(&services);

        let trigger = AutomationStep::new(automation.id, StepSubtype::TriggerApiCall);
        let rule = AutomationStep::new(automation.id, StepSubtype::RuleIfElse)
            .with_parent(trigger.id)
            .with_configuration(json!({
                "filterGroups": {
                    "operator": "AND",
                    "groups": [{
                        "operator": "AND",
                        "conditions": [
                            { "field": "properties.age", "operator": "startsWith", "value": "1" }
                        ]
                    }]
                }
            }));
        // Unregistered at save time, so the condition compiles to false.
        for step in [&trigger, &rule] {
            engine.save_step(step.clone()).await.unwrap();
        }
        services
            .contacts
            .register_property(automation.audience_id, "age", PropertyKind::Float);

        let contact = Contact::new(automation.audience_id, "a@example.com").with_property("age", 18.0);
        services.contacts.insert(contact.clone());

        let error = engine
            .handle(AutomationJob::RunAutomationStepForContact {
                automation_step_id: rule.id,
                contact_id: contact.id,
            })
            .await
            .unwrap_err();

        assert!(error.is_fatal());
        assert!(services.ledger.is_empty());
        assert!(services.queue.is_empty());
    }

    #[tokio::test]
    async fn test_update_attributes_merges_properties() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::ActionUpdateContactAttributes)
            .with_parent(StepId::new())
            .with_configuration(json!({
                "attributes": {
                    "plan": "pro",
                    "interests": ["golf", "chess"]
                }
            }));
        services.automations.insert_step(step.clone());
        let contact = Contact::new(AudienceId::new(), "a@example.com")
            .with_property("plan", "free")
            .with_property("score", 10.0);
        services.contacts.insert(contact.clone());

        let outcome = engine
            .handle(AutomationJob::RunAutomationStepForContact {
                automation_step_id: step.id,
                contact_id: contact.id,
            })
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Done);

        let stored = services.contacts.get(contact.id).unwrap();
        assert_eq!(stored.properties["plan"], PropertyValue::Text("pro".into()));
        assert_eq!(
            stored.properties["interests"],
            PropertyValue::List(vec!["golf".into(), "chess".into()])
        );
        assert_eq!(stored.properties["score"], PropertyValue::Float(10.0));
        let entry = services.ledger.entry(contact.id, step.id).unwrap();
        assert_eq!(entry.status, LedgerStatus::Completed);
    }

    #[tokio::test]
    async fn test_remove_tag_detaches_only_that_tag() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let (removed, kept) = (TagId::new(), TagId::new());
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::ActionRemoveTag)
            .with_parent(StepId::new())
            .with_tag(removed);
        services.automations.insert_step(step.clone());
        let contact = Contact::new(AudienceId::new(), "a@example.com").with_tags([removed, kept]);
        services.contacts.insert(contact.clone());

        let outcome = engine.run_step_for_contact(step.id, contact.id).await.unwrap();
        assert_eq!(outcome, JobOutcome::Done);

        let stored = services.contacts.get(contact.id).unwrap();
        assert!(!stored.has_tag(removed));
        assert!(stored.has_tag(kept));
        assert_eq!(
            services.contacts.tag_calls(),
            vec![TagCall::Detach {
                contact_id: contact.id,
                tag_ids: vec![removed],
            }]
        );
    }

    #[tokio::test]
    async fn test_deleted_targets_are_benign() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::End)
            .with_parent(StepId::new());
        services.automations.insert_step(step.clone());

        let outcome = engine
            .handle(AutomationJob::RunAutomationStepForContact {
                automation_step_id: step.id,
                contact_id: ContactId::new(),
            })
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Skipped(SkipReason::ContactNotFound));

        let outcome = engine
            .handle(AutomationJob::RunAutomationStep {
                automation_step_id: StepId::new(),
                attempt: 0,
            })
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Skipped(SkipReason::Gone));
    }

    #[tokio::test]
    async fn test_sweep_crash_resumes_without_duplicates() {
        let services = MemoryServices::new();
        let config = EngineConfigBuilder::default()
            .sweep_page_size(3usize)
            .build()
            .unwrap();
        let engine = Engine::new(config, services.collaborators());

        let tag = TagId::new();
        let step = AutomationStep::new(AutomationId::new(), StepSubtype::ActionAddTag)
            .with_parent(StepId::new())
            .with_tag(tag);
        services.automations.insert_step(step.clone());

        let audience = AudienceId::new();
        let mut contacts = Vec::new();
        for index in 0..7 {
            let contact = Contact::new(audience, format!("c{index}@example.com"));
            services.contacts.insert(contact.clone());
            services
                .ledger
                .create_ledger_entry(contact.id, step.id, LedgerStatus::Pending, services.clock.now())
                .await
                .unwrap();
            contacts.push(contact.id);
        }

        // The sweep dies while enqueueing its second page.
        services.queue.set_enqueue_budget(Some(4));
        let error = engine.advance(step.id, 0).await.unwrap_err();
        assert!(error.is_transient());
        services.queue.set_enqueue_budget(None);

        memory::drain(&engine, &services.queue, &services.clock, 100)
            .await
            .unwrap();
        let report = engine.advance(step.id, 0).await.unwrap();
        assert_eq!(report.enqueued, 3);
        memory::drain(&engine, &services.queue, &services.clock, 100)
            .await
            .unwrap();

        for contact_id in &contacts {
            let entry = services.ledger.entry(*contact_id, step.id).unwrap();
            assert_eq!(entry.status, LedgerStatus::Completed);
        }
        assert_eq!(services.ledger.len(), contacts.len());

        let tagged: BTreeSet<ContactId> = services
            .contacts
            .tag_calls()
            .into_iter()
            .map(|call| match call {
                TagCall::Attach { contact_id, .. } | TagCall::Detach { contact_id, .. } => {
                    contact_id
                }
            })
            .collect();
        assert_eq!(services.contacts.tag_calls().len(), contacts.len());
        assert_eq!(tagged.len(), contacts.len());
    }

    #[tokio::test]
    async fn test_segment_contacts() {
        let services = MemoryServices::new();
        let engine = engine(&services);
        let audience = AudienceId::new();
        services
            .contacts
            .register_property(audience, "score", PropertyKind::Float);

        let high = Contact::new(audience, "high@example.com").with_property("score", 90.0);
        let low = Contact::new(audience, "low@example.com").with_property("score", 10.0);
        let elsewhere = Contact::new(AudienceId::new(), "x@example.com").with_property("score", 99.0);
        for contact in [&high, &low, &elsewhere] {
            services.contacts.insert(contact.clone());
        }

        let groups = serde_json::from_value(json!({
            "operator": "AND",
            "groups": [{
                "operator": "AND",
                "conditions": [{ "field": "properties.score", "operator": "gte", "value": 50 }]
            }]
        }))
        .unwrap();

        let matched: Vec<Contact> = engine
            .segment_contacts(audience, &groups)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(matched, vec![high]);
    }
}
