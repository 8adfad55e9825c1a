//! Job stream and consumer configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const DEFAULT_STREAM: &str = "AUTOMATION_JOBS";
const DEFAULT_SUBJECT_PREFIX: &str = "automation.jobs";
const DEFAULT_CONSUMER: &str = "drip-worker";
const DEFAULT_ACK_WAIT_SECS: u64 = 300;
const DEFAULT_FETCH_BATCH: usize = 32;
const DEFAULT_FETCH_EXPIRES_SECS: u64 = 5;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX_SECS: u64 = 300;

/// Configuration of the automation job stream and its pull consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct QueueConfig {
    /// JetStream stream holding automation jobs
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-stream", env = "QUEUE_STREAM", default_value = DEFAULT_STREAM)
    )]
    pub queue_stream: String,

    /// Subject prefix; jobs publish on `<prefix>.<job-name>`
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-subject-prefix", env = "QUEUE_SUBJECT_PREFIX", default_value = DEFAULT_SUBJECT_PREFIX)
    )]
    pub queue_subject_prefix: String,

    /// Durable pull consumer name shared by all workers
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-consumer", env = "QUEUE_CONSUMER", default_value = DEFAULT_CONSUMER)
    )]
    pub queue_consumer: String,

    /// Seconds a delivered job may run before the broker redelivers it
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-ack-wait", env = "QUEUE_ACK_WAIT_SECS", default_value_t = DEFAULT_ACK_WAIT_SECS)
    )]
    pub queue_ack_wait_secs: u64,

    /// Maximum messages pulled per fetch
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-fetch-batch", env = "QUEUE_FETCH_BATCH", default_value_t = DEFAULT_FETCH_BATCH)
    )]
    pub queue_fetch_batch: usize,

    /// Attempts per job when the enqueuer does not set one
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-max-attempts", env = "QUEUE_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)
    )]
    pub queue_max_attempts: u32,

    /// First retry delay in milliseconds; doubles per attempt
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-retry-base-ms", env = "QUEUE_RETRY_BASE_MS", default_value_t = DEFAULT_RETRY_BASE_MS)
    )]
    pub queue_retry_base_ms: u64,

    /// Retry delay ceiling in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "queue-retry-max", env = "QUEUE_RETRY_MAX_SECS", default_value_t = DEFAULT_RETRY_MAX_SECS)
    )]
    pub queue_retry_max_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_stream: DEFAULT_STREAM.to_owned(),
            queue_subject_prefix: DEFAULT_SUBJECT_PREFIX.to_owned(),
            queue_consumer: DEFAULT_CONSUMER.to_owned(),
            queue_ack_wait_secs: DEFAULT_ACK_WAIT_SECS,
            queue_fetch_batch: DEFAULT_FETCH_BATCH,
            queue_max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue_retry_base_ms: DEFAULT_RETRY_BASE_MS,
            queue_retry_max_secs: DEFAULT_RETRY_MAX_SECS,
        }
    }
}

impl QueueConfig {
    /// Returns the wildcard subject bound to the stream.
    pub fn stream_subjects(&self) -> String {
        format!("{}.>", self.queue_subject_prefix)
    }

    /// Returns the ack wait.
    #[inline]
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.queue_ack_wait_secs)
    }

    /// Returns how often a job in progress tells the broker it is alive.
    ///
    /// A third of the ack wait, so two heartbeats may be lost before the
    /// broker redelivers.
    pub fn progress_interval(&self) -> Duration {
        (self.ack_wait() / 3).max(Duration::from_secs(1))
    }

    /// Returns how many messages to pull when at most `concurrency` jobs run
    /// at once.
    #[inline]
    pub fn fetch_batch(&self, concurrency: usize) -> usize {
        self.queue_fetch_batch.min(concurrency).max(1)
    }

    /// Returns how long an empty fetch waits before returning.
    #[inline]
    pub fn fetch_expires(&self) -> Duration {
        Duration::from_secs(DEFAULT_FETCH_EXPIRES_SECS)
    }

    /// Returns the retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.queue_retry_base_ms),
            Duration::from_secs(self.queue_retry_max_secs),
        )
    }

    /// Set the stream name.
    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.queue_stream = stream.into();
        self
    }

    /// Set the consumer name.
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.queue_consumer = consumer.into();
        self
    }

    /// Set the default attempts per job.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.queue_max_attempts = attempts;
        self
    }

    /// Validates names and bounds.
    pub fn validate(&self) -> Result<()> {
        if self.queue_stream.is_empty()
            || self
                .queue_stream
                .contains(|c: char| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
        {
            return Err(Error::invalid_config(format!(
                "invalid stream name: '{}'",
                self.queue_stream
            )));
        }
        if self.queue_subject_prefix.is_empty() || self.queue_subject_prefix.ends_with('.') {
            return Err(Error::invalid_config(format!(
                "invalid subject prefix: '{}'",
                self.queue_subject_prefix
            )));
        }
        if self.queue_consumer.is_empty() {
            return Err(Error::invalid_config("consumer name cannot be empty"));
        }
        if self.queue_fetch_batch == 0 {
            return Err(Error::invalid_config("fetch batch must be greater than 0"));
        }
        if self.queue_max_attempts == 0 {
            return Err(Error::invalid_config("max attempts must be greater than 0"));
        }
        Ok(())
    }
}

/// Exponential backoff between redeliveries of a failed job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound of any delay.
    pub max_backoff: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
        )
    }
}

impl RetryPolicy {
    /// Creates a doubling policy.
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            backoff_multiplier: 2.0,
        }
    }

    /// Returns the delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64).min(self.max_backoff)
    }
}
