//! Job payloads exchanged with the queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::{AutomationId, ContactId, StepId, TagId};
use crate::model::StepSubtype;

/// Domain event that may start automations for a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Trigger subtype the event corresponds to.
    pub subtype: StepSubtype,
    /// Tag that changed, for tag events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<TagId>,
}

impl TriggerEvent {
    /// A tag was attached to the contact.
    pub fn tag_added(tag_id: TagId) -> Self {
        Self {
            subtype: StepSubtype::TriggerContactTagAdded,
            tag_id: Some(tag_id),
        }
    }

    /// A tag was detached from the contact.
    pub fn tag_removed(tag_id: TagId) -> Self {
        Self {
            subtype: StepSubtype::TriggerContactTagRemoved,
            tag_id: Some(tag_id),
        }
    }

    /// The contact subscribed.
    pub fn subscribed() -> Self {
        Self {
            subtype: StepSubtype::TriggerContactSubscribed,
            tag_id: None,
        }
    }

    /// An API call asked to trigger automations.
    pub fn api_call() -> Self {
        Self {
            subtype: StepSubtype::TriggerApiCall,
            tag_id: None,
        }
    }
}

/// Unit of work consumed by [`Engine::handle`](crate::Engine::handle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", content = "payload", rename_all_fields = "camelCase")]
pub enum AutomationJob {
    /// Start one automation for one contact.
    RunAutomationForContact {
        automation_id: AutomationId,
        contact_id: ContactId,
    },
    /// Execute one step for one contact.
    RunAutomationStepForContact {
        automation_step_id: StepId,
        contact_id: ContactId,
    },
    /// Sweep every contact pending at a step.
    RunAutomationStep {
        automation_step_id: StepId,
        #[serde(default)]
        attempt: u32,
    },
    /// Dispatch a trigger event for a contact.
    TriggerAutomationsForContact {
        contact_id: ContactId,
        trigger: TriggerEvent,
    },
}

impl AutomationJob {
    /// Returns the job name, usable as a subject token.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunAutomationForContact { .. } => "run-automation-for-contact",
            Self::RunAutomationStepForContact { .. } => "run-automation-step-for-contact",
            Self::RunAutomationStep { .. } => "run-automation-step",
            Self::TriggerAutomationsForContact { .. } => "trigger-automations-for-contact",
        }
    }

    /// Returns the contact the job is about, if it targets one.
    pub fn contact_id(&self) -> Option<ContactId> {
        match self {
            Self::RunAutomationForContact { contact_id, .. }
            | Self::RunAutomationStepForContact { contact_id, .. }
            | Self::TriggerAutomationsForContact { contact_id, .. } => Some(*contact_id),
            Self::RunAutomationStep { .. } => None,
        }
    }
}

/// Delivery options of an enqueued job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Earliest delivery, relative to enqueue time.
    pub delay: Option<Duration>,
    /// Maximum delivery attempts; the queue default applies when `None`.
    pub attempts: Option<u32>,
}

impl EnqueueOptions {
    /// Options with a delivery delay.
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            attempts: None,
        }
    }

    /// Sets the delivery delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the maximum delivery attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }
}

/// A job plus its delivery options, as passed to bulk enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub job: AutomationJob,
    pub options: EnqueueOptions,
}

impl JobEntry {
    /// Creates an entry.
    pub fn new(job: AutomationJob, options: EnqueueOptions) -> Self {
        Self { job, options }
    }
}
