use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use drip_filter::{Predicate, PropertyKind, PropertyValue};
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::{AudienceId, ContactId, TagId};
use crate::model::Contact;
use crate::store::ContactStore;

/// A tag mutation issued through [`ContactStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCall {
    Attach { contact_id: ContactId, tag_ids: Vec<TagId> },
    Detach { contact_id: ContactId, tag_ids: Vec<TagId> },
}

#[derive(Debug, Default)]
struct ContactState {
    contacts: HashMap<ContactId, Contact>,
    properties: HashMap<AudienceId, HashMap<String, PropertyKind>>,
    tag_calls: Vec<TagCall>,
}

/// Contact store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    state: Mutex<ContactState>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a contact.
    pub fn insert(&self, contact: Contact) {
        self.lock().contacts.insert(contact.id, contact);
    }

    /// Returns a snapshot of a contact.
    pub fn get(&self, id: ContactId) -> Option<Contact> {
        self.lock().contacts.get(&id).cloned()
    }

    /// Removes a contact.
    pub fn remove(&self, id: ContactId) -> Option<Contact> {
        self.lock().contacts.remove(&id)
    }

    /// Declares a custom property of an audience.
    pub fn register_property(&self, audience_id: AudienceId, key: impl Into<String>, kind: PropertyKind) {
        self.lock()
            .properties
            .entry(audience_id)
            .or_default()
            .insert(key.into(), kind);
    }

    /// Returns every tag mutation in call order.
    pub fn tag_calls(&self) -> Vec<TagCall> {
        self.lock().tag_calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ContactState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ContactState {
    fn contact_mut(&mut self, id: ContactId) -> RuntimeResult<&mut Contact> {
        self.contacts
            .get_mut(&id)
            .ok_or_else(|| RuntimeError::not_found("contact", id))
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn find_by_id(&self, id: ContactId) -> RuntimeResult<Option<Contact>> {
        Ok(self.get(id))
    }

    async fn find_matching(
        &self,
        audience_id: AudienceId,
        predicate: &Predicate,
    ) -> RuntimeResult<BoxStream<'static, RuntimeResult<Contact>>> {
        let mut matching: Vec<Contact> = self
            .lock()
            .contacts
            .values()
            .filter(|contact| contact.audience_id == audience_id && predicate.evaluate(*contact))
            .cloned()
            .collect();
        matching.sort_by_key(|contact| contact.id);

        Ok(stream::iter(matching.into_iter().map(Ok)).boxed())
    }

    async fn known_properties(
        &self,
        audience_id: AudienceId,
    ) -> RuntimeResult<HashMap<String, PropertyKind>> {
        Ok(self
            .lock()
            .properties
            .get(&audience_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_attributes(
        &self,
        id: ContactId,
        attributes: &BTreeMap<String, PropertyValue>,
    ) -> RuntimeResult<()> {
        let mut state = self.lock();
        let contact = state.contact_mut(id)?;
        contact
            .properties
            .extend(attributes.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(())
    }

    async fn list_tags(&self, id: ContactId) -> RuntimeResult<Vec<TagId>> {
        self.lock()
            .contacts
            .get(&id)
            .map(|contact| contact.tag_ids.iter().copied().collect())
            .ok_or_else(|| RuntimeError::not_found("contact", id))
    }

    async fn attach_tags(&self, id: ContactId, tag_ids: &[TagId]) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.contact_mut(id)?.tag_ids.extend(tag_ids);
        state.tag_calls.push(TagCall::Attach {
            contact_id: id,
            tag_ids: tag_ids.to_vec(),
        });
        Ok(())
    }

    async fn detach_tags(&self, id: ContactId, tag_ids: &[TagId]) -> RuntimeResult<()> {
        let mut state = self.lock();
        let contact = state.contact_mut(id)?;
        for tag_id in tag_ids {
            contact.tag_ids.remove(tag_id);
        }
        state.tag_calls.push(TagCall::Detach {
            contact_id: id,
            tag_ids: tag_ids.to_vec(),
        });
        Ok(())
    }
}
