//! Collaborator interfaces consumed by the engine.
//!
//! Concrete persistence and transport live outside this crate; the
//! [`memory`](crate::memory) module implements every trait in memory.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use drip_filter::{Predicate, PropertyKind, PropertyValue};
use futures::stream::BoxStream;
use jiff::Timestamp;

use crate::cursor::LedgerCursor;
use crate::error::RuntimeResult;
use crate::ids::{AudienceId, AutomationId, ContactId, EmailId, LedgerEntryId, StepId, TagId};
use crate::jobs::{AutomationJob, EnqueueOptions, JobEntry};
use crate::model::{
    Automation, AutomationStatus, AutomationStep, Branch, Contact, LedgerEntry, LedgerStatus,
    StepSubtype,
};

/// Read and mutate contacts.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Returns a contact by id.
    async fn find_by_id(&self, id: ContactId) -> RuntimeResult<Option<Contact>>;

    /// Streams the audience's contacts matching a predicate.
    async fn find_matching(
        &self,
        audience_id: AudienceId,
        predicate: &Predicate,
    ) -> RuntimeResult<BoxStream<'static, RuntimeResult<Contact>>>;

    /// Returns the audience's custom property registry.
    async fn known_properties(
        &self,
        audience_id: AudienceId,
    ) -> RuntimeResult<HashMap<String, PropertyKind>>;

    /// Merges attributes into the contact's custom properties.
    async fn update_attributes(
        &self,
        id: ContactId,
        attributes: &BTreeMap<String, PropertyValue>,
    ) -> RuntimeResult<()>;

    /// Returns the contact's current tags.
    async fn list_tags(&self, id: ContactId) -> RuntimeResult<Vec<TagId>>;

    /// Ensures the tags are present on the contact.
    async fn attach_tags(&self, id: ContactId, tag_ids: &[TagId]) -> RuntimeResult<()>;

    /// Ensures the tags are absent from the contact.
    async fn detach_tags(&self, id: ContactId, tag_ids: &[TagId]) -> RuntimeResult<()>;
}

/// Read and write automations and their steps.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Returns an automation by id.
    async fn find_automation(&self, id: AutomationId) -> RuntimeResult<Option<Automation>>;

    /// Returns a step by id.
    async fn find_step(&self, id: StepId) -> RuntimeResult<Option<AutomationStep>>;

    /// Returns the child of `parent_id` on `branch` (`None` for unlabeled children).
    async fn find_child_step(
        &self,
        parent_id: StepId,
        branch: Option<Branch>,
    ) -> RuntimeResult<Option<AutomationStep>>;

    /// Returns steps of the given subtype in the audience's automations with `status`.
    async fn find_steps_by_subtype_and_status(
        &self,
        audience_id: AudienceId,
        subtype: StepSubtype,
        status: AutomationStatus,
    ) -> RuntimeResult<Vec<AutomationStep>>;

    /// Returns every step of an automation.
    async fn steps_for_automation(
        &self,
        automation_id: AutomationId,
    ) -> RuntimeResult<Vec<AutomationStep>>;

    /// Inserts or replaces a step.
    async fn save_step(&self, step: AutomationStep) -> RuntimeResult<()>;
}

/// Result of inserting a ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInsert {
    /// The row was inserted.
    Created(LedgerEntry),
    /// A row for the pair already existed; it is returned unchanged.
    Existing(LedgerEntry),
}

/// One page of pending ledger rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerPage {
    /// Rows in `(created_at, id)` order.
    pub entries: Vec<LedgerEntry>,
    /// Cursor for the next page, `None` when exhausted.
    pub next_cursor: Option<LedgerCursor>,
}

impl LedgerPage {
    /// Builds a page from rows fetched with `page_size + 1` as limit.
    pub fn from_overfetch(mut entries: Vec<LedgerEntry>, page_size: usize) -> Self {
        let has_more = entries.len() > page_size;
        if has_more {
            entries.truncate(page_size);
        }

        let next_cursor = if has_more {
            entries.last().map(LedgerCursor::after)
        } else {
            None
        };

        Self {
            entries,
            next_cursor,
        }
    }
}

/// The execution ledger; unique per `(contact_id, step_id)`.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the row for a pair.
    async fn find_ledger_entry(
        &self,
        contact_id: ContactId,
        step_id: StepId,
    ) -> RuntimeResult<Option<LedgerEntry>>;

    /// Inserts a row unless one exists for the pair.
    async fn create_ledger_entry(
        &self,
        contact_id: ContactId,
        step_id: StepId,
        status: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<LedgerInsert>;

    /// Sets a row's status unconditionally.
    async fn update_ledger_status(
        &self,
        entry_id: LedgerEntryId,
        status: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<()>;

    /// Moves a row from `from` to `to`; returns `false` if it was not in `from`.
    async fn transition_ledger_status(
        &self,
        entry_id: LedgerEntryId,
        from: LedgerStatus,
        to: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<bool>;

    /// Returns one page of rows pending at `step_id` after `cursor`.
    async fn find_pending_contacts_for_step(
        &self,
        step_id: StepId,
        cursor: Option<LedgerCursor>,
        page_size: usize,
    ) -> RuntimeResult<LedgerPage>;
}

/// At-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues one job.
    async fn enqueue(&self, job: AutomationJob, options: EnqueueOptions) -> RuntimeResult<()>;

    /// Enqueues several jobs.
    async fn enqueue_bulk(&self, entries: Vec<JobEntry>) -> RuntimeResult<()> {
        for entry in entries {
            self.enqueue(entry.job, entry.options).await?;
        }
        Ok(())
    }
}

/// Transactional email delivery.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Queues the email for the contact; success means accepted, not delivered.
    async fn send_transactional(&self, email_id: EmailId, contact_id: ContactId)
    -> RuntimeResult<()>;
}

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
