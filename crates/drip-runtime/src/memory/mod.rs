//! In-memory collaborators.
//!
//! Every store, the queue, the email sender and the clock have a map-backed
//! implementation here. They are not durable; tests and the CLI simulator
//! use them to run an [`Engine`] end to end in a single process, with
//! [`drain`] playing the part of the worker pool.

mod automations;
mod clock;
mod contacts;
mod email;
mod ledger;
mod queue;

use std::sync::Arc;

use jiff::Timestamp;

pub use self::automations::MemoryAutomationStore;
pub use self::clock::ManualClock;
pub use self::contacts::{MemoryContactStore, TagCall};
pub use self::email::RecordingEmailSender;
pub use self::ledger::MemoryLedgerStore;
pub use self::queue::{MemoryJobQueue, QueuedJob};
use crate::TRACING_TARGET_ENGINE;
use crate::engine::{Collaborators, Engine, JobOutcome};
use crate::error::RuntimeResult;
use crate::store::Clock;

/// One of each in-memory collaborator, sharing a manual clock.
#[derive(Clone)]
pub struct MemoryServices {
    pub contacts: Arc<MemoryContactStore>,
    pub automations: Arc<MemoryAutomationStore>,
    pub ledger: Arc<MemoryLedgerStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub email: Arc<RecordingEmailSender>,
    pub clock: Arc<ManualClock>,
}

impl MemoryServices {
    /// Creates empty collaborators with the clock at the current instant.
    pub fn new() -> Self {
        Self::at(Timestamp::now())
    }

    /// Creates empty collaborators with the clock at `now`.
    pub fn at(now: Timestamp) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        Self {
            contacts: Arc::new(MemoryContactStore::new()),
            automations: Arc::new(MemoryAutomationStore::new()),
            ledger: Arc::new(MemoryLedgerStore::new()),
            queue: Arc::new(MemoryJobQueue::new(clock.clone())),
            email: Arc::new(RecordingEmailSender::new()),
            clock,
        }
    }

    /// Returns the collaborators as engine trait objects.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            contacts: self.contacts.clone(),
            automations: self.automations.clone(),
            ledger: self.ledger.clone(),
            queue: self.queue.clone(),
            email: self.email.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl Default for MemoryServices {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a [`drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Deliveries handled.
    pub processed: usize,
    /// Deliveries that finished with [`JobOutcome::Done`].
    pub done: usize,
    /// Deliveries that finished with [`JobOutcome::Skipped`].
    pub skipped: usize,
    /// Deliveries that failed transiently and were put back.
    pub retried: usize,
    /// Deliveries dropped after a fatal error or their last attempt.
    pub dropped: usize,
    /// Whether the run stopped at `max_jobs` with work left.
    pub exhausted: bool,
}

/// Delivers queued jobs to the engine until the queue is empty.
///
/// When no job is ready the clock jumps to the next delayed job. Transient
/// failures are redelivered while attempts remain. Stops after `max_jobs`
/// deliveries so that self-rescheduling jobs cannot loop forever.
pub async fn drain(
    engine: &Engine,
    queue: &MemoryJobQueue,
    clock: &ManualClock,
    max_jobs: usize,
) -> RuntimeResult<DrainReport> {
    let mut report = DrainReport::default();

    loop {
        if report.processed >= max_jobs {
            report.exhausted = !queue.is_empty();
            break;
        }

        let Some(queued) = queue.pop_ready(clock.now()) else {
            match queue.next_ready_at() {
                Some(ready_at) => {
                    clock.set(ready_at);
                    continue;
                }
                None => break,
            }
        };

        report.processed += 1;
        match engine.handle(queued.job.clone()).await {
            Ok(JobOutcome::Done) => report.done += 1,
            Ok(JobOutcome::Skipped(_)) => report.skipped += 1,
            Err(error) if error.is_transient() && queued.delivered + 1 < queued.attempts => {
                report.retried += 1;
                queue.redeliver(queued);
            }
            Err(error) => {
                tracing::debug!(
                    target: TRACING_TARGET_ENGINE,
                    job = queued.job.name(),
                    error = %error,
                    "Dropping job"
                );
                report.dropped += 1;
            }
        }
    }

    Ok(report)
}
