//! Action executors.

use std::sync::Arc;

use async_trait::async_trait;

use super::executor::{Effect, ExecutionContext, StepExecutor};
use crate::TRACING_TARGET_RUNNER;
use crate::error::{RuntimeError, RuntimeResult};
use crate::step::StepConfig;
use crate::store::{ContactStore, EmailSender};

/// `ACTION_SEND_EMAIL`.
pub struct SendEmailExecutor {
    email: Arc<dyn EmailSender>,
}

impl SendEmailExecutor {
    pub fn new(email: Arc<dyn EmailSender>) -> Self {
        Self { email }
    }
}

#[async_trait]
impl StepExecutor for SendEmailExecutor {
    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        let step = context.step;
        let email_id = step
            .email_id
            .ok_or_else(|| RuntimeError::invalid_configuration(step.id, "missing emailId"))?;

        let status = context.contact.status;
        if !status.is_mailable() {
            tracing::info!(
                target: TRACING_TARGET_RUNNER,
                step_id = %step.id,
                contact_id = %context.contact.id,
                status = %status,
                "Contact cannot receive email"
            );
            return Ok(Effect::Fail {
                reason: format!("contact is {status}"),
            });
        }

        self.email.send_transactional(email_id, context.contact.id).await?;
        Ok(Effect::Advance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagOperation {
    Attach,
    Detach,
}

/// `ACTION_ADD_TAG` and `ACTION_REMOVE_TAG`.
pub struct TagExecutor {
    contacts: Arc<dyn ContactStore>,
    operation: TagOperation,
}

impl TagExecutor {
    /// Executor that adds the step's tag.
    pub fn attach(contacts: Arc<dyn ContactStore>) -> Self {
        Self {
            contacts,
            operation: TagOperation::Attach,
        }
    }

    /// Executor that removes the step's tag.
    pub fn detach(contacts: Arc<dyn ContactStore>) -> Self {
        Self {
            contacts,
            operation: TagOperation::Detach,
        }
    }
}

#[async_trait]
impl StepExecutor for TagExecutor {
    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        let step = context.step;
        let tag_id = step
            .tag_id
            .ok_or_else(|| RuntimeError::invalid_configuration(step.id, "missing tagId"))?;

        let contact_id = context.contact.id;
        match self.operation {
            TagOperation::Attach => self.contacts.attach_tags(contact_id, &[tag_id]).await?,
            TagOperation::Detach => self.contacts.detach_tags(contact_id, &[tag_id]).await?,
        }

        Ok(Effect::Advance)
    }
}

/// `ACTION_UPDATE_CONTACT_ATTRIBUTES`.
pub struct UpdateAttributesExecutor {
    contacts: Arc<dyn ContactStore>,
}

impl UpdateAttributesExecutor {
    pub fn new(contacts: Arc<dyn ContactStore>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl StepExecutor for UpdateAttributesExecutor {
    async fn execute(&self, context: &ExecutionContext<'_>) -> RuntimeResult<Effect> {
        let StepConfig::UpdateAttributes(config) = context.config else {
            return Err(RuntimeError::invalid_configuration(
                context.step.id,
                "expected attributes configuration",
            ));
        };

        self.contacts
            .update_attributes(context.contact.id, &config.properties())
            .await?;
        Ok(Effect::Advance)
    }
}
