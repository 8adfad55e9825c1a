//! Trigger matching and automation entry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use drip_filter::{AudienceContext, FilterGroups, PropertyKind, UnknownPropertyPolicy};

use crate::TRACING_TARGET_DISPATCHER;
use crate::config::EngineConfig;
use crate::engine::{Collaborators, JobOutcome, SkipReason};
use crate::error::{RuntimeError, RuntimeResult};
use crate::guard::{Claim, IdempotencyGuard};
use crate::ids::{AutomationId, TagId};
use crate::jobs::TriggerEvent;
use crate::model::{AutomationStatus, AutomationStep, Contact, StepSubtype};
use crate::scheduler::Scheduler;
use crate::step::StepConfig;
use crate::store::{AutomationStore, Clock, ContactStore};

/// Summary of one dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Active triggers of the event's subtype in the contact's audience.
    pub candidates: usize,
    /// Automations the contact entered.
    pub started: Vec<AutomationId>,
    /// Matching triggers the contact had already passed.
    pub already_triggered: usize,
}

/// Result of trying to enter one automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Started,
    AlreadyTriggered,
}

/// Matches trigger events to automations and enters contacts into them.
#[derive(Clone)]
pub struct Dispatcher {
    contacts: Arc<dyn ContactStore>,
    automations: Arc<dyn AutomationStore>,
    clock: Arc<dyn Clock>,
    guard: IdempotencyGuard,
    scheduler: Scheduler,
    policy: UnknownPropertyPolicy,
}

impl Dispatcher {
    pub fn new(services: &Collaborators, config: &EngineConfig) -> Self {
        Self {
            contacts: services.contacts.clone(),
            automations: services.automations.clone(),
            clock: services.clock.clone(),
            guard: IdempotencyGuard::new(services.ledger.clone(), services.clock.clone()),
            scheduler: Scheduler::new(services, config),
            policy: config.unknown_property_policy,
        }
    }

    /// Enters the contact into every active automation whose trigger matches.
    ///
    /// A trigger with corrupt configuration is logged and skipped so that it
    /// cannot block other automations of the audience.
    pub async fn on_event(
        &self,
        contact: &Contact,
        event: &TriggerEvent,
    ) -> RuntimeResult<DispatchReport> {
        if !event.subtype.is_trigger() {
            return Err(RuntimeError::invalid_graph(format!(
                "{} is not a trigger subtype",
                event.subtype
            )));
        }

        let triggers = self
            .automations
            .find_steps_by_subtype_and_status(
                contact.audience_id,
                event.subtype,
                AutomationStatus::Active,
            )
            .await?;

        let mut report = DispatchReport {
            candidates: triggers.len(),
            ..Default::default()
        };
        if triggers.is_empty() {
            return Ok(report);
        }

        let tags: BTreeSet<TagId> = if event.subtype.is_tag_trigger() {
            self.contacts.list_tags(contact.id).await?.into_iter().collect()
        } else {
            BTreeSet::new()
        };
        let mut properties = None;

        for trigger in &triggers {
            let config = match StepConfig::parse(trigger) {
                Ok(config) => config,
                Err(error) => {
                    tracing::error!(
                        target: TRACING_TARGET_DISPATCHER,
                        step_id = %trigger.id,
                        automation_id = %trigger.automation_id,
                        error = %error,
                        "Skipping trigger with invalid configuration"
                    );
                    continue;
                }
            };

            if !matches_event(&config, event, &tags) {
                continue;
            }

            if let Some(groups) = config.filter_groups() {
                if properties.is_none() {
                    properties = Some(self.contacts.known_properties(contact.audience_id).await?);
                }
                let registry = properties.get_or_insert_with(HashMap::new);
                match self.evaluate(groups, registry, contact) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(error) => {
                        tracing::error!(
                            target: TRACING_TARGET_DISPATCHER,
                            step_id = %trigger.id,
                            error = %error,
                            "Skipping trigger with invalid filter"
                        );
                        continue;
                    }
                }
            }

            match self.enter(contact, trigger).await? {
                Entry::Started => report.started.push(trigger.automation_id),
                Entry::AlreadyTriggered => report.already_triggered += 1,
            }
        }

        tracing::info!(
            target: TRACING_TARGET_DISPATCHER,
            contact_id = %contact.id,
            subtype = %event.subtype,
            candidates = report.candidates,
            started = report.started.len(),
            already_triggered = report.already_triggered,
            "Trigger event dispatched"
        );
        Ok(report)
    }

    /// Enters the contact into one automation, bypassing subtype matching.
    ///
    /// The automation must be active and belong to the contact's audience;
    /// the trigger's own filter still applies.
    pub async fn run_automation(
        &self,
        automation_id: AutomationId,
        contact: &Contact,
    ) -> RuntimeResult<JobOutcome> {
        let Some(automation) = self.automations.find_automation(automation_id).await? else {
            return Ok(JobOutcome::Skipped(SkipReason::AutomationNotFound));
        };
        if !automation.status.is_active() {
            return Ok(JobOutcome::Skipped(SkipReason::AutomationInactive));
        }
        if automation.audience_id != contact.audience_id {
            return Ok(JobOutcome::Skipped(SkipReason::AudienceMismatch));
        }

        let steps = self.automations.steps_for_automation(automation_id).await?;
        let Some(trigger) = steps.iter().find(|step| step.subtype.is_trigger()) else {
            return Ok(JobOutcome::Skipped(SkipReason::TriggerNotFound));
        };

        let config = StepConfig::parse(trigger)?;
        if let Some(groups) = config.filter_groups() {
            let registry = self.contacts.known_properties(contact.audience_id).await?;
            if !self.evaluate(groups, &registry, contact)? {
                return Ok(JobOutcome::Skipped(SkipReason::NotMatched));
            }
        }

        Ok(match self.enter(contact, trigger).await? {
            Entry::Started => JobOutcome::Done,
            Entry::AlreadyTriggered => JobOutcome::Skipped(SkipReason::AlreadyTriggered),
        })
    }

    /// Records the trigger row, schedules the first downstream step, then
    /// completes the trigger row.
    ///
    /// A trigger row left pending by a crash is resumed rather than skipped.
    async fn enter(&self, contact: &Contact, trigger: &AutomationStep) -> RuntimeResult<Entry> {
        let entry = match self.guard.claim(contact.id, trigger.id).await? {
            Claim::Acquired(entry) => entry,
            Claim::AlreadyRan(_) => {
                tracing::debug!(
                    target: TRACING_TARGET_DISPATCHER,
                    contact_id = %contact.id,
                    automation_id = %trigger.automation_id,
                    "Contact already entered automation"
                );
                return Ok(Entry::AlreadyTriggered);
            }
        };

        match self.automations.find_child_step(trigger.id, None).await? {
            Some(first) => {
                self.scheduler.schedule(contact.id, first.id).await?;
            }
            None => {
                tracing::warn!(
                    target: TRACING_TARGET_DISPATCHER,
                    automation_id = %trigger.automation_id,
                    "Automation has no step after its trigger"
                );
            }
        }

        if !self.guard.complete(&entry).await? {
            return Ok(Entry::AlreadyTriggered);
        }

        tracing::debug!(
            target: TRACING_TARGET_DISPATCHER,
            contact_id = %contact.id,
            automation_id = %trigger.automation_id,
            "Contact entered automation"
        );
        Ok(Entry::Started)
    }

    fn evaluate(
        &self,
        groups: &FilterGroups,
        registry: &HashMap<String, PropertyKind>,
        contact: &Contact,
    ) -> RuntimeResult<bool> {
        let audience = AudienceContext::new(self.clock.now())
            .with_properties(registry.iter().map(|(key, kind)| (key.clone(), *kind)))
            .with_unknown_property_policy(self.policy);
        let predicate = drip_filter::compile(groups, &audience)?;
        Ok(predicate.evaluate(contact))
    }
}

/// Tests a trigger's subtype-specific condition against the event.
///
/// Tag-added matches when a configured tag is currently on the contact,
/// tag-removed when one is currently absent; an event naming a tag narrows
/// the test to that tag.
fn matches_event(config: &StepConfig, event: &TriggerEvent, tags: &BTreeSet<TagId>) -> bool {
    let StepConfig::TagTrigger(trigger) = config else {
        return true;
    };

    let present = match event.subtype {
        StepSubtype::TriggerContactTagAdded => true,
        StepSubtype::TriggerContactTagRemoved => false,
        _ => return true,
    };

    match event.tag_id {
        Some(tag_id) => trigger.tag_ids.contains(&tag_id) && tags.contains(&tag_id) == present,
        None => trigger
            .tag_ids
            .iter()
            .any(|tag_id| tags.contains(tag_id) == present),
    }
}
