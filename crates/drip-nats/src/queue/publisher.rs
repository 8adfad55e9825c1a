//! JetStream-backed [`JobQueue`].

use std::future::IntoFuture;
use std::sync::Arc;

use async_nats::HeaderMap;
use async_nats::header::NATS_MESSAGE_ID;
use async_nats::jetstream::{self, stream};
use async_trait::async_trait;
use drip_runtime::jobs::{AutomationJob, EnqueueOptions, JobEntry};
use drip_runtime::store::{Clock, JobQueue, SystemClock};
use drip_runtime::RuntimeResult;
use futures::future::try_join_all;

use super::config::QueueConfig;
use super::envelope::JobEnvelope;
use crate::{Error, NatsClient, Result, TRACING_TARGET_QUEUE};

/// Publishes automation jobs to a work-queue stream.
#[derive(Clone)]
pub struct NatsJobQueue {
    jetstream: jetstream::Context,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
}

impl NatsJobQueue {
    /// Binds to the configured stream, creating it when missing.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_QUEUE)]
    pub async fn new(client: &NatsClient, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let jetstream = client.jetstream().clone();

        match jetstream.get_stream(&config.queue_stream).await {
            Ok(_) => {
                tracing::debug!(
                    target: TRACING_TARGET_QUEUE,
                    stream = %config.queue_stream,
                    "Using existing job stream"
                );
            }
            Err(_) => {
                tracing::info!(
                    target: TRACING_TARGET_QUEUE,
                    stream = %config.queue_stream,
                    subjects = %config.stream_subjects(),
                    "Creating job stream"
                );

                let stream_config = stream::Config {
                    name: config.queue_stream.clone(),
                    description: Some("Automation jobs".to_owned()),
                    subjects: vec![config.stream_subjects()],
                    retention: stream::RetentionPolicy::WorkQueue,
                    ..Default::default()
                };

                jetstream
                    .create_stream(stream_config)
                    .await
                    .map_err(|e| Error::stream_error(&config.queue_stream, e.to_string()))?;
            }
        }

        Ok(Self {
            jetstream,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock used to stamp envelopes.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the queue configuration.
    #[inline]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Wraps a job in a first-attempt envelope.
    pub fn envelope(&self, job: AutomationJob, options: EnqueueOptions) -> JobEnvelope {
        JobEnvelope::new(
            job,
            options,
            self.config.queue_max_attempts,
            self.clock.now(),
        )
    }

    /// Publishes an envelope and waits for the stream acknowledgement.
    pub async fn publish(&self, envelope: &JobEnvelope) -> Result<()> {
        self.publish_all(std::slice::from_ref(envelope)).await
    }

    /// Publishes envelopes, then waits for every acknowledgement.
    #[tracing::instrument(skip_all, fields(count = envelopes.len()), target = TRACING_TARGET_QUEUE)]
    pub async fn publish_all(&self, envelopes: &[JobEnvelope]) -> Result<()> {
        let mut acks = Vec::with_capacity(envelopes.len());

        for envelope in envelopes {
            let subject = envelope.subject(&self.config.queue_subject_prefix);
            let payload = serde_json::to_vec(envelope)?;

            let mut headers = HeaderMap::new();
            headers.insert(NATS_MESSAGE_ID, envelope.id.to_string().as_str());

            let ack = self
                .jetstream
                .publish_with_headers(subject.clone(), headers, payload.into())
                .await
                .map_err(|e| Error::delivery_failed(&subject, e.to_string()))?;
            acks.push(ack.into_future());

            tracing::trace!(
                target: TRACING_TARGET_QUEUE,
                envelope_id = %envelope.id,
                subject = %subject,
                attempt = envelope.attempt,
                "Published job"
            );
        }

        try_join_all(acks)
            .await
            .map_err(|e| Error::operation("job_publish_ack", e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    async fn enqueue(&self, job: AutomationJob, options: EnqueueOptions) -> RuntimeResult<()> {
        let envelope = self.envelope(job, options);
        self.publish(&envelope).await?;
        Ok(())
    }

    async fn enqueue_bulk(&self, entries: Vec<JobEntry>) -> RuntimeResult<()> {
        let envelopes: Vec<_> = entries
            .into_iter()
            .map(|entry| self.envelope(entry.job, entry.options))
            .collect();

        self.publish_all(&envelopes).await?;
        Ok(())
    }
}
