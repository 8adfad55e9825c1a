//! Pull consumer driving the engine from the job stream.

use std::future::Future;
use std::time::Duration;

use async_nats::jetstream::consumer::{PullConsumer, pull};
use async_nats::jetstream::{AckKind, Message};
use drip_runtime::{Engine, JobOutcome, RuntimeResult};
use futures::StreamExt;
use futures::future::join_all;
use jiff::Timestamp;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::config::RetryPolicy;
use super::envelope::JobEnvelope;
use super::publisher::NatsJobQueue;
use crate::{Error, Result, TRACING_TARGET_QUEUE};

const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What to do with a delivered envelope once the engine has handled it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Handled or skipped; acknowledge.
    Ack,
    /// Transient failure; publish the next attempt, then acknowledge.
    Retry(JobEnvelope),
    /// Transient failure on the last attempt; terminate.
    Exhausted,
    /// Data-integrity failure; terminate without retrying.
    Reject,
}

/// Maps an engine result to a settlement.
pub fn settle(
    envelope: &JobEnvelope,
    result: &RuntimeResult<JobOutcome>,
    policy: &RetryPolicy,
    now: Timestamp,
) -> Settlement {
    match result {
        Ok(_) => Settlement::Ack,
        Err(error) if error.is_benign() => Settlement::Ack,
        Err(error) if error.is_transient() => envelope
            .retry(policy.backoff(envelope.attempt), now)
            .map_or(Settlement::Exhausted, Settlement::Retry),
        Err(_) => Settlement::Reject,
    }
}

/// Counters of a consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Messages pulled from the stream.
    pub received: usize,
    /// Jobs that ran to [`JobOutcome::Done`].
    pub done: usize,
    /// Jobs the engine skipped.
    pub skipped: usize,
    /// Envelopes sent back because they were not due.
    pub deferred: usize,
    /// Failed jobs republished for another attempt.
    pub retried: usize,
    /// Failed jobs dropped after their last attempt.
    pub exhausted: usize,
    /// Undecodable or fatally failing jobs.
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Done,
    Skipped,
    Deferred,
    Retried,
    Exhausted,
    Rejected,
}

impl ConsumerReport {
    fn record(&mut self, processed: Processed) {
        self.received += 1;
        match processed {
            Processed::Done => self.done += 1,
            Processed::Skipped => self.skipped += 1,
            Processed::Deferred => self.deferred += 1,
            Processed::Retried => self.retried += 1,
            Processed::Exhausted => self.exhausted += 1,
            Processed::Rejected => self.rejected += 1,
        }
    }
}

/// Drives `work` to completion, awaiting `beat` every `every` meanwhile.
async fn keep_alive<T, B, F>(work: impl Future<Output = T>, every: Duration, mut beat: B) -> T
where
    B: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            output = &mut work => return output,
            _ = ticker.tick() => beat().await,
        }
    }
}

/// Durable pull consumer feeding [`Engine::handle`].
///
/// At most `max_concurrent_jobs` messages are pulled at a time, and a
/// message being handled is kept alive with progress acknowledgements, so
/// the broker does not redeliver a job that is still running. A worker that
/// dies between a step's effect and its ledger transition still leaves the
/// job to be redelivered, and the effect runs again.
pub struct JobConsumer {
    queue: NatsJobQueue,
    consumer: PullConsumer,
    engine: Engine,
    policy: RetryPolicy,
}

impl JobConsumer {
    /// Binds the durable consumer named in the queue configuration.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_QUEUE)]
    pub async fn new(queue: NatsJobQueue, engine: Engine) -> Result<Self> {
        let config = queue.config();
        let stream = queue
            .jetstream()
            .get_stream(&config.queue_stream)
            .await
            .map_err(|e| Error::stream_error(&config.queue_stream, e.to_string()))?;

        // Redelivery is unbounded; attempts are counted in the envelope.
        let consumer_config = pull::Config {
            durable_name: Some(config.queue_consumer.clone()),
            description: Some("Automation job worker".to_owned()),
            ack_wait: config.ack_wait(),
            max_deliver: -1,
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(&config.queue_consumer, consumer_config)
            .await
            .map_err(|e| Error::consumer_error(&config.queue_consumer, e.to_string()))?;

        tracing::debug!(
            target: TRACING_TARGET_QUEUE,
            consumer = %config.queue_consumer,
            stream = %config.queue_stream,
            "Bound job consumer"
        );

        let policy = config.retry_policy();
        Ok(Self {
            queue,
            consumer,
            engine,
            policy,
        })
    }

    /// Pulls and handles batches until `cancel` fires.
    ///
    /// A batch in progress is finished before the loop observes cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> ConsumerReport {
        let mut report = ConsumerReport::default();

        tracing::info!(
            target: TRACING_TARGET_QUEUE,
            consumer = %self.queue.config().queue_consumer,
            "Starting job consumer"
        );

        loop {
            let batch = tokio::select! {
                biased;

                () = cancel.cancelled() => break,
                batch = self.fetch_batch() => batch,
            };

            let messages = match batch {
                Ok(messages) => messages,
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET_QUEUE,
                        error = %error,
                        "Failed to fetch jobs"
                    );
                    tokio::select! {
                        biased;

                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(FETCH_RETRY_DELAY) => continue,
                    }
                }
            };

            let processed = join_all(messages.into_iter().map(|m| self.process(m))).await;
            for outcome in processed {
                report.record(outcome);
            }
        }

        tracing::info!(
            target: TRACING_TARGET_QUEUE,
            received = report.received,
            done = report.done,
            retried = report.retried,
            rejected = report.rejected,
            "Job consumer stopped"
        );

        report
    }

    async fn fetch_batch(&self) -> Result<Vec<Message>> {
        let config = self.queue.config();
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(config.fetch_batch(self.engine.config().max_concurrent_jobs))
            .expires(config.fetch_expires())
            .messages()
            .await
            .map_err(|e| Error::consumer_error(&config.queue_consumer, e.to_string()))?;

        let mut batch = Vec::new();
        while let Some(message) = messages.next().await {
            match message {
                Ok(message) => batch.push(message),
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET_QUEUE,
                        error = %error,
                        "Failed to receive job message"
                    );
                }
            }
        }

        Ok(batch)
    }

    async fn process(&self, message: Message) -> Processed {
        let envelope: JobEnvelope = match serde_json::from_slice(&message.payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET_QUEUE,
                    subject = %message.subject,
                    error = %error,
                    "Discarding undecodable job"
                );
                self.acknowledge(&message, AckKind::Term).await;
                return Processed::Rejected;
            }
        };

        if let Some(delay) = envelope.remaining_delay(self.queue.clock().now()) {
            self.acknowledge(&message, AckKind::Nak(Some(delay))).await;
            return Processed::Deferred;
        }

        let every = self.queue.config().progress_interval();
        let result = keep_alive(self.engine.handle(envelope.job.clone()), every, || {
            self.acknowledge(&message, AckKind::Progress)
        })
        .await;
        let now = self.queue.clock().now();

        match settle(&envelope, &result, &self.policy, now) {
            Settlement::Ack => {
                self.acknowledge(&message, AckKind::Ack).await;
                match result {
                    Ok(JobOutcome::Done) => Processed::Done,
                    _ => Processed::Skipped,
                }
            }
            Settlement::Retry(next) => match self.queue.publish(&next).await {
                Ok(()) => {
                    tracing::debug!(
                        target: TRACING_TARGET_QUEUE,
                        job = envelope.job.name(),
                        attempt = next.attempt,
                        max_attempts = next.max_attempts,
                        "Scheduled job retry"
                    );
                    self.acknowledge(&message, AckKind::Ack).await;
                    Processed::Retried
                }
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET_QUEUE,
                        job = envelope.job.name(),
                        error = %error,
                        "Failed to republish job, leaving it for redelivery"
                    );
                    let delay = next.remaining_delay(now);
                    self.acknowledge(&message, AckKind::Nak(delay)).await;
                    Processed::Retried
                }
            },
            Settlement::Exhausted => {
                tracing::error!(
                    target: TRACING_TARGET_QUEUE,
                    job = envelope.job.name(),
                    envelope_id = %envelope.id,
                    attempts = envelope.attempt,
                    "Dropping job after its last attempt"
                );
                self.acknowledge(&message, AckKind::Term).await;
                Processed::Exhausted
            }
            Settlement::Reject => {
                self.acknowledge(&message, AckKind::Term).await;
                Processed::Rejected
            }
        }
    }

    async fn acknowledge(&self, message: &Message, kind: AckKind) {
        if let Err(error) = message.ack_with(kind).await {
            tracing::warn!(
                target: TRACING_TARGET_QUEUE,
                subject = %message.subject,
                error = %error,
                "Failed to acknowledge job message"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use drip_runtime::jobs::{AutomationJob, EnqueueOptions};
    use drip_runtime::{ContactId, RuntimeError, SkipReason, StepId};

    use super::*;

    fn envelope(attempts: u32) -> JobEnvelope {
        let job = AutomationJob::RunAutomationStepForContact {
            automation_step_id: StepId::new(),
            contact_id: ContactId::new(),
        };
        JobEnvelope::new(
            job,
            EnqueueOptions::default().with_attempts(attempts),
            3,
            Timestamp::now(),
        )
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(60))
    }

    #[test]
    fn test_handled_jobs_are_acked() {
        let now = Timestamp::now();
        let envelope = envelope(3);

        assert_eq!(
            settle(&envelope, &Ok(JobOutcome::Done), &policy(), now),
            Settlement::Ack
        );
        assert_eq!(
            settle(
                &envelope,
                &Ok(JobOutcome::Skipped(SkipReason::AlreadyRan)),
                &policy(),
                now
            ),
            Settlement::Ack
        );
        assert_eq!(
            settle(
                &envelope,
                &Err(RuntimeError::not_found("contact", "c-1")),
                &policy(),
                now
            ),
            Settlement::Ack
        );
    }

    #[test]
    fn test_transient_failure_retries_with_backoff() {
        let now = Timestamp::now();
        let first = envelope(3);

        let Settlement::Retry(second) =
            settle(&first, &Err(RuntimeError::email("timeout")), &policy(), now)
        else {
            panic!("expected a retry");
        };
        assert_eq!(second.attempt, 2);
        assert_eq!(second.remaining_delay(now), Some(Duration::from_secs(2)));

        let Settlement::Retry(third) =
            settle(&second, &Err(RuntimeError::store("down")), &policy(), now)
        else {
            panic!("expected a retry");
        };
        assert_eq!(third.attempt, 3);
        assert_eq!(third.remaining_delay(now), Some(Duration::from_secs(4)));

        assert_eq!(
            settle(&third, &Err(RuntimeError::queue("down")), &policy(), now),
            Settlement::Exhausted
        );
    }

    #[test]
    fn test_fatal_failure_is_rejected() {
        let step_id = StepId::new();
        assert_eq!(
            settle(
                &envelope(3),
                &Err(RuntimeError::invalid_configuration(step_id, "missing tagId")),
                &policy(),
                Timestamp::now()
            ),
            Settlement::Reject
        );
    }

    #[test]
    fn test_report_counts() {
        let mut report = ConsumerReport::default();
        for processed in [
            Processed::Done,
            Processed::Done,
            Processed::Skipped,
            Processed::Deferred,
            Processed::Retried,
            Processed::Rejected,
        ] {
            report.record(processed);
        }

        assert_eq!(report.received, 6);
        assert_eq!(report.done, 2);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.exhausted, 0);
    }

    #[tokio::test]
    async fn test_long_job_sends_heartbeats() {
        let beats = std::cell::Cell::new(0);
        let output = keep_alive(
            async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                "done"
            },
            Duration::from_millis(20),
            || {
                beats.set(beats.get() + 1);
                async {}
            },
        )
        .await;

        assert_eq!(output, "done");
        assert!(beats.get() >= 2, "only {} heartbeats", beats.get());
    }

    #[tokio::test]
    async fn test_quick_job_sends_no_heartbeat() {
        let beats = std::cell::Cell::new(0);
        let output = keep_alive(async { 7 }, Duration::from_secs(60), || {
            beats.set(beats.get() + 1);
            async {}
        })
        .await;

        assert_eq!(output, 7);
        assert_eq!(beats.get(), 0);
    }
}
