//! Wire envelope of a queued automation job.

use std::time::Duration;

use drip_runtime::jobs::{AutomationJob, EnqueueOptions};
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A job plus its delivery bookkeeping, serialized as the message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Unique per publish; sent as the `Nats-Msg-Id` header.
    pub id: Uuid,
    /// The job to run.
    pub job: AutomationJob,
    /// Delivery attempt this envelope carries, starting at 1.
    pub attempt: u32,
    /// Attempts allowed before the job is dropped.
    pub max_attempts: u32,
    /// Earliest instant the job may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<Timestamp>,
    /// When the job was first enqueued.
    pub created_at: Timestamp,
}

impl JobEnvelope {
    /// Wraps a job for its first attempt.
    pub fn new(
        job: AutomationJob,
        options: EnqueueOptions,
        default_attempts: u32,
        now: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job,
            attempt: 1,
            max_attempts: options.attempts.unwrap_or(default_attempts).max(1),
            not_before: options.delay.map(|delay| shift(now, delay)),
            created_at: now,
        }
    }

    /// Returns the subject the envelope publishes on.
    pub fn subject(&self, prefix: &str) -> String {
        format!("{prefix}.{}", self.job.name())
    }

    /// Returns how long the job must still wait, if `not_before` is ahead of `now`.
    pub fn remaining_delay(&self, now: Timestamp) -> Option<Duration> {
        let not_before = self.not_before?;
        Duration::try_from(not_before.duration_since(now))
            .ok()
            .filter(|delay| !delay.is_zero())
    }

    /// Returns whether another attempt is allowed after this one.
    #[inline]
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Returns the envelope of the next attempt, delayed by `delay`, or
    /// `None` once attempts are exhausted.
    pub fn retry(&self, delay: Duration, now: Timestamp) -> Option<Self> {
        if !self.can_retry() {
            return None;
        }

        Some(Self {
            id: Uuid::now_v7(),
            job: self.job.clone(),
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            not_before: Some(shift(now, delay)),
            created_at: self.created_at,
        })
    }
}

fn shift(now: Timestamp, delay: Duration) -> Timestamp {
    let delay = SignedDuration::try_from(delay).unwrap_or(SignedDuration::MAX);
    now.checked_add(delay).unwrap_or(Timestamp::MAX)
}

#[cfg(test)]
mod tests {
    use drip_runtime::{ContactId, StepId};

    use super::*;

    fn job() -> AutomationJob {
        AutomationJob::RunAutomationStepForContact {
            automation_step_id: StepId::new(),
            contact_id: ContactId::new(),
        }
    }

    #[test]
    fn test_first_attempt() {
        let now = Timestamp::now();
        let envelope = JobEnvelope::new(job(), EnqueueOptions::default(), 3, now);

        assert_eq!(envelope.attempt, 1);
        assert_eq!(envelope.max_attempts, 3);
        assert_eq!(envelope.not_before, None);
        assert_eq!(envelope.remaining_delay(now), None);
        assert_eq!(
            envelope.subject("automation.jobs"),
            "automation.jobs.run-automation-step-for-contact"
        );
    }

    #[test]
    fn test_delay_and_attempts_from_options() {
        let now = Timestamp::now();
        let options = EnqueueOptions::delayed(Duration::from_secs(90)).with_attempts(5);
        let envelope = JobEnvelope::new(job(), options, 3, now);

        assert_eq!(envelope.max_attempts, 5);
        assert_eq!(
            envelope.remaining_delay(now),
            Some(Duration::from_secs(90))
        );
        assert_eq!(
            envelope.remaining_delay(now + SignedDuration::from_secs(90)),
            None
        );
        assert_eq!(
            envelope.remaining_delay(now + SignedDuration::from_secs(60)),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_retry_until_exhausted() {
        let now = Timestamp::now();
        let first = JobEnvelope::new(job(), EnqueueOptions::default().with_attempts(2), 3, now);

        let second = first.retry(Duration::from_secs(4), now).unwrap();
        assert_eq!(second.attempt, 2);
        assert_ne!(second.id, first.id);
        assert_eq!(second.job, first.job);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.remaining_delay(now), Some(Duration::from_secs(4)));

        assert!(second.retry(Duration::from_secs(8), now).is_none());
    }

    #[test]
    fn test_wire_shape() {
        let now: Timestamp = "2026-03-01T10:00:00Z".parse().unwrap();
        let envelope = JobEnvelope::new(job(), EnqueueOptions::default(), 3, now);

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["attempt"], 1);
        assert_eq!(value["maxAttempts"], 3);
        assert_eq!(value["createdAt"], "2026-03-01T10:00:00Z");
        assert!(value.get("notBefore").is_none());
        assert_eq!(value["job"]["job"], "RunAutomationStepForContact");

        let decoded: JobEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, envelope);
    }
}
