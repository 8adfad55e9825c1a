//! Automations.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::ids::{AudienceId, AutomationId};

/// Activation status of an automation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationStatus {
    /// Triggers start new contacts.
    Active,
    /// No new contacts enter; in-flight jobs still run.
    #[default]
    Inactive,
}

impl AutomationStatus {
    /// Returns whether the automation accepts new contacts.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A named graph of steps scoped to one audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub id: AutomationId,
    pub audience_id: AudienceId,
    pub name: String,
    #[serde(default)]
    pub status: AutomationStatus,
}

impl Automation {
    /// Creates an inactive automation.
    pub fn new(audience_id: AudienceId, name: impl Into<String>) -> Self {
        Self {
            id: AutomationId::new(),
            audience_id,
            name: name.into(),
            status: AutomationStatus::Inactive,
        }
    }

    /// Sets the activation status.
    pub fn with_status(mut self, status: AutomationStatus) -> Self {
        self.status = status;
        self
    }
}
