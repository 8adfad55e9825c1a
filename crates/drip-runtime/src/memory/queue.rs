use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use jiff::{SignedDuration, Timestamp};

use crate::error::{RuntimeError, RuntimeResult};
use crate::jobs::{AutomationJob, EnqueueOptions};
use crate::store::{Clock, JobQueue};

/// Delivery attempts when the enqueuer does not ask for a number.
const DEFAULT_ATTEMPTS: u32 = 1;

/// A job waiting in [`MemoryJobQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: AutomationJob,
    /// Earliest delivery instant.
    pub ready_at: Timestamp,
    /// Maximum delivery attempts.
    pub attempts: u32,
    /// Deliveries so far.
    pub delivered: u32,
    sequence: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: Vec<QueuedJob>,
    sequence: u64,
    budget: Option<usize>,
}

/// Delayed job queue on a shared clock.
pub struct MemoryJobQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Returns queued jobs in enqueue order, ready or not.
    pub fn pending_jobs(&self) -> Vec<AutomationJob> {
        self.lock().jobs.iter().map(|queued| queued.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued job.
    pub fn clear(&self) {
        self.lock().jobs.clear();
    }

    /// Limits how many further enqueues succeed; `None` lifts the limit.
    ///
    /// Enqueues past the limit fail with a transient error, which simulates
    /// a worker crashing mid-sweep.
    pub fn set_enqueue_budget(&self, budget: Option<usize>) {
        self.lock().budget = budget;
    }

    /// Removes and returns the job due first, if it is ready at `now`.
    pub fn pop_ready(&self, now: Timestamp) -> Option<QueuedJob> {
        let mut state = self.lock();
        let position = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.ready_at <= now)
            .min_by_key(|(_, queued)| (queued.ready_at, queued.sequence))
            .map(|(position, _)| position)?;
        Some(state.jobs.remove(position))
    }

    /// Returns the earliest instant at which a job becomes ready.
    pub fn next_ready_at(&self) -> Option<Timestamp> {
        self.lock().jobs.iter().map(|queued| queued.ready_at).min()
    }

    /// Puts a failed job back for another delivery.
    pub fn redeliver(&self, mut queued: QueuedJob) {
        queued.delivered = queued.delivered.saturating_add(1);
        let mut state = self.lock();
        state.sequence += 1;
        queued.sequence = state.sequence;
        state.jobs.push(queued);
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: AutomationJob, options: EnqueueOptions) -> RuntimeResult<()> {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(budget) = state.budget.as_mut() {
            if *budget == 0 {
                return Err(RuntimeError::queue("enqueue budget exhausted"));
            }
            *budget -= 1;
        }

        let delay = options
            .delay
            .and_then(|delay| SignedDuration::try_from(delay).ok())
            .unwrap_or(SignedDuration::ZERO);
        state.sequence += 1;
        let queued = QueuedJob {
            job,
            ready_at: now.checked_add(delay).unwrap_or(Timestamp::MAX),
            attempts: options.attempts.unwrap_or(DEFAULT_ATTEMPTS),
            delivered: 0,
            sequence: state.sequence,
        };
        state.jobs.push(queued);
        Ok(())
    }
}
