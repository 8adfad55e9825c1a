use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use jiff::Timestamp;

use crate::cursor::LedgerCursor;
use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::{ContactId, LedgerEntryId, StepId};
use crate::model::{LedgerEntry, LedgerStatus};
use crate::store::{LedgerInsert, LedgerPage, LedgerStore};

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<LedgerEntryId, LedgerEntry>,
    pairs: HashMap<(ContactId, StepId), LedgerEntryId>,
}

/// Ledger backed by maps, with the `(contact, step)` uniqueness of the
/// durable table.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every row in `(created_at, id)` order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        entries
    }

    /// Returns the row of a pair.
    pub fn entry(&self, contact_id: ContactId, step_id: StepId) -> Option<LedgerEntry> {
        let state = self.lock();
        let id = state.pairs.get(&(contact_id, step_id))?;
        state.entries.get(id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn find_ledger_entry(
        &self,
        contact_id: ContactId,
        step_id: StepId,
    ) -> RuntimeResult<Option<LedgerEntry>> {
        Ok(self.entry(contact_id, step_id))
    }

    async fn create_ledger_entry(
        &self,
        contact_id: ContactId,
        step_id: StepId,
        status: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<LedgerInsert> {
        let mut state = self.lock();
        if let Some(existing) = state
            .pairs
            .get(&(contact_id, step_id))
            .and_then(|id| state.entries.get(id))
        {
            return Ok(LedgerInsert::Existing(existing.clone()));
        }

        let entry = LedgerEntry::new(contact_id, step_id, status, now);
        state.pairs.insert((contact_id, step_id), entry.id);
        state.entries.insert(entry.id, entry.clone());
        Ok(LedgerInsert::Created(entry))
    }

    async fn update_ledger_status(
        &self,
        entry_id: LedgerEntryId,
        status: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| RuntimeError::not_found("ledger entry", entry_id))?;
        entry.status = status;
        entry.updated_at = now;
        Ok(())
    }

    async fn transition_ledger_status(
        &self,
        entry_id: LedgerEntryId,
        from: LedgerStatus,
        to: LedgerStatus,
        now: Timestamp,
    ) -> RuntimeResult<bool> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| RuntimeError::not_found("ledger entry", entry_id))?;
        if entry.status != from {
            return Ok(false);
        }
        entry.status = to;
        entry.updated_at = now;
        Ok(true)
    }

    async fn find_pending_contacts_for_step(
        &self,
        step_id: StepId,
        cursor: Option<LedgerCursor>,
        page_size: usize,
    ) -> RuntimeResult<LedgerPage> {
        let mut entries: Vec<_> = self
            .lock()
            .entries
            .values()
            .filter(|entry| entry.step_id == step_id && entry.status == LedgerStatus::Pending)
            .filter(|entry| cursor.as_ref().is_none_or(|cursor| cursor.precedes(entry)))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.created_at, entry.id));
        entries.truncate(page_size.saturating_add(1));

        Ok(LedgerPage::from_overfetch(entries, page_size))
    }
}
