use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ids::{ContactId, EmailId};
use crate::store::EmailSender;

#[derive(Debug, Default)]
struct EmailState {
    sent: Vec<(EmailId, ContactId)>,
    failures: usize,
}

/// Email sender that records sends instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingEmailSender {
    state: Mutex<EmailState>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every accepted send in order.
    pub fn sent(&self) -> Vec<(EmailId, ContactId)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).sent.clone()
    }

    /// Makes the next `count` sends fail with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).failures = count;
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_transactional(
        &self,
        email_id: EmailId,
        contact_id: ContactId,
    ) -> RuntimeResult<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.failures > 0 {
            state.failures -= 1;
            return Err(RuntimeError::email("provider unavailable"));
        }
        state.sent.push((email_id, contact_id));
        Ok(())
    }
}
