//! Contacts.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use drip_filter::{ActivityColumn, ContactColumn, Membership, PropertyValue, Subject};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::ids::{AudienceId, ContactId, TagId};

/// Subscription status of a contact.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactStatus {
    #[default]
    Subscribed,
    Unsubscribed,
    Bounced,
    Complained,
}

impl ContactStatus {
    /// Returns whether email can be sent to the contact.
    #[inline]
    pub fn is_mailable(self) -> bool {
        matches!(self, Self::Subscribed)
    }
}

/// A contact of an audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub audience_id: AudienceId,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: ContactStatus,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub last_opened_at: Option<Timestamp>,
    #[serde(default)]
    pub last_clicked_at: Option<Timestamp>,
    #[serde(default)]
    pub last_sent_at: Option<Timestamp>,
    #[serde(default)]
    pub tag_ids: BTreeSet<TagId>,
    #[serde(default)]
    pub segment_ids: BTreeSet<Uuid>,
    /// Custom properties keyed by property name.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Contact {
    /// Creates a subscribed contact with only an email.
    pub fn new(audience_id: AudienceId, email: impl Into<String>) -> Self {
        Self {
            id: ContactId::new(),
            audience_id,
            email: email.into(),
            first_name: None,
            last_name: None,
            phone: None,
            status: ContactStatus::Subscribed,
            source: None,
            last_opened_at: None,
            last_clicked_at: None,
            last_sent_at: None,
            tag_ids: BTreeSet::new(),
            segment_ids: BTreeSet::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds tags.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = TagId>) -> Self {
        self.tag_ids.extend(tags);
        self
    }

    /// Sets a custom property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns whether the contact carries the tag.
    #[inline]
    pub fn has_tag(&self, tag_id: TagId) -> bool {
        self.tag_ids.contains(&tag_id)
    }
}

impl Subject for Contact {
    fn column(&self, column: ContactColumn) -> Option<Cow<'_, str>> {
        let value = match column {
            ContactColumn::Email => Some(self.email.as_str()),
            ContactColumn::FirstName => self.first_name.as_deref(),
            ContactColumn::LastName => self.last_name.as_deref(),
            ContactColumn::Phone => self.phone.as_deref(),
            ContactColumn::Source => self.source.as_deref(),
            ContactColumn::Status => {
                let status: &'static str = self.status.into();
                Some(status)
            }
        };
        value.map(Cow::Borrowed)
    }

    fn activity(&self, column: ActivityColumn) -> Option<Timestamp> {
        match column {
            ActivityColumn::LastOpenedAt => self.last_opened_at,
            ActivityColumn::LastClickedAt => self.last_clicked_at,
            ActivityColumn::LastSentAt => self.last_sent_at,
        }
    }

    fn has_member(&self, membership: Membership, id: &Uuid) -> bool {
        match membership {
            Membership::Tags => self.tag_ids.contains(&TagId::from_uuid(*id)),
            Membership::Segments => self.segment_ids.contains(id),
        }
    }

    fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

#[cfg(test)]
mod tests {
    use drip_filter::{AudienceContext, FilterGroups, compile};

    use super::*;

    #[test]
    fn test_contact_as_subject() {
        let vip = TagId::new();
        let contact = Contact::new(AudienceId::new(), "ana@acme.io")
            .with_tags([vip])
            .with_property("plan", "pro");

        let groups: FilterGroups = serde_json::from_value(serde_json::json!({
            "operator": "AND",
            "groups": [{
                "operator": "AND",
                "conditions": [
                    { "field": "status", "operator": "eq", "value": "SUBSCRIBED" },
                    { "field": "tags", "operator": "contains", "value": [vip.to_string()] },
                    { "field": "properties.plan", "operator": "eq", "value": "pro" }
                ]
            }]
        }))
        .unwrap();

        let context = AudienceContext::default()
            .with_property("plan", drip_filter::PropertyKind::Text);
        let predicate = compile(&groups, &context).unwrap();
        assert!(predicate.evaluate(&contact));

        let other = Contact::new(contact.audience_id, "bob@acme.io");
        assert!(!predicate.evaluate(&other));
    }
}
