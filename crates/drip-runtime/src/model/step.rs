//! Automation steps.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::ids::{AutomationId, EmailId, StepId, TagId};

/// Step family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Trigger,
    Action,
    Rule,
    End,
}

/// Closed set of step subtypes; each belongs to exactly one [`StepType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString, IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum StepSubtype {
    TriggerContactTagAdded,
    TriggerContactTagRemoved,
    TriggerContactSubscribed,
    TriggerApiCall,
    ActionSendEmail,
    ActionAddTag,
    ActionRemoveTag,
    ActionUpdateContactAttributes,
    RuleIfElse,
    RuleWaitForDuration,
    End,
}

impl StepSubtype {
    /// Returns the family the subtype belongs to.
    pub fn step_type(self) -> StepType {
        match self {
            Self::TriggerContactTagAdded
            | Self::TriggerContactTagRemoved
            | Self::TriggerContactSubscribed
            | Self::TriggerApiCall => StepType::Trigger,
            Self::ActionSendEmail
            | Self::ActionAddTag
            | Self::ActionRemoveTag
            | Self::ActionUpdateContactAttributes => StepType::Action,
            Self::RuleIfElse | Self::RuleWaitForDuration => StepType::Rule,
            Self::End => StepType::End,
        }
    }

    /// Returns whether this is a trigger subtype.
    #[inline]
    pub fn is_trigger(self) -> bool {
        self.step_type() == StepType::Trigger
    }

    /// Returns whether the trigger reacts to tag changes.
    #[inline]
    pub fn is_tag_trigger(self) -> bool {
        matches!(
            self,
            Self::TriggerContactTagAdded | Self::TriggerContactTagRemoved
        )
    }

    /// Returns whether children of this step carry a branch label.
    #[inline]
    pub fn is_branching(self) -> bool {
        matches!(self, Self::RuleIfElse)
    }
}

/// Labeled edge out of an `IF/ELSE` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Branch {
    Yes,
    No,
}

impl From<bool> for Branch {
    fn from(matched: bool) -> Self {
        if matched { Self::Yes } else { Self::No }
    }
}

/// A node of an automation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStep {
    pub id: StepId,
    pub automation_id: AutomationId,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub subtype: StepSubtype,
    /// Upstream step; `None` only for the trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<StepId>,
    /// Edge label when the parent is an `IF/ELSE` step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<EmailId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<TagId>,
    /// Subtype-specific payload, validated at write time.
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl AutomationStep {
    /// Creates a parentless step of the given subtype.
    pub fn new(automation_id: AutomationId, subtype: StepSubtype) -> Self {
        Self {
            id: StepId::new(),
            automation_id,
            step_type: subtype.step_type(),
            subtype,
            parent_id: None,
            branch: None,
            email_id: None,
            tag_id: None,
            configuration: serde_json::Value::Null,
        }
    }

    /// Attaches the step under `parent`.
    pub fn with_parent(mut self, parent: StepId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// Attaches the step under an `IF/ELSE` parent on the given branch.
    pub fn with_branch(mut self, parent: StepId, branch: Branch) -> Self {
        self.parent_id = Some(parent);
        self.branch = Some(branch);
        self
    }

    /// Sets the email sent by `ACTION_SEND_EMAIL`.
    pub fn with_email(mut self, email_id: EmailId) -> Self {
        self.email_id = Some(email_id);
        self
    }

    /// Sets the tag used by tag actions.
    pub fn with_tag(mut self, tag_id: TagId) -> Self {
        self.tag_id = Some(tag_id);
        self
    }

    /// Sets the subtype-specific configuration.
    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_subtype_wire_names() {
        assert_eq!(
            StepSubtype::TriggerContactTagAdded.to_string(),
            "TRIGGER_CONTACT_TAG_ADDED"
        );
        assert_eq!(
            serde_json::to_string(&StepSubtype::ActionUpdateContactAttributes).unwrap(),
            "\"ACTION_UPDATE_CONTACT_ATTRIBUTES\""
        );
        assert_eq!(
            "RULE_WAIT_FOR_DURATION".parse::<StepSubtype>().unwrap(),
            StepSubtype::RuleWaitForDuration
        );
    }

    #[test]
    fn test_subtype_families() {
        let triggers = StepSubtype::iter().filter(|s| s.is_trigger()).count();
        assert_eq!(triggers, 4);
        assert_eq!(StepSubtype::RuleIfElse.step_type(), StepType::Rule);
        assert_eq!(StepSubtype::End.step_type(), StepType::End);
    }

    #[test]
    fn test_step_serde_shape() {
        let automation_id = AutomationId::new();
        let parent = StepId::new();
        let step = AutomationStep::new(automation_id, StepSubtype::End)
            .with_branch(parent, Branch::No);

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "END");
        assert_eq!(json["branch"], "NO");
        assert_eq!(json["parentId"], parent.to_string());

        let back: AutomationStep = serde_json::from_value(json).unwrap();
        assert_eq!(back, step);
    }
}
