//! Execution ledger rows.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::ids::{ContactId, LedgerEntryId, StepId};

/// Progress of a contact at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    /// The contact reached the step; no terminal outcome yet.
    Pending,
    /// The step ran for the contact.
    Completed,
    /// The step produced a failure outcome for the contact.
    Failed,
}

impl LedgerStatus {
    /// Returns whether the status is final.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Record of one contact at one step; at most one per `(contact_id, step_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub contact_id: ContactId,
    pub step_id: StepId,
    pub status: LedgerStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl LedgerEntry {
    /// Creates a new row stamped at `now`.
    pub fn new(contact_id: ContactId, step_id: StepId, status: LedgerStatus, now: Timestamp) -> Self {
        Self {
            id: LedgerEntryId::new(),
            contact_id,
            step_id,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}
