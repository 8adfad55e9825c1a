//! At-least-once automation job transport over a JetStream work queue.
//!
//! [`NatsJobQueue`] implements the engine's `JobQueue` by publishing
//! [`JobEnvelope`]s on `<prefix>.<job-name>`; [`JobConsumer`] pulls them back
//! and runs each through [`Engine::handle`](drip_runtime::Engine::handle).
//! Delays are carried in the envelope and honored by negative
//! acknowledgement; retries are republished envelopes with a higher attempt.

mod config;
mod consumer;
mod envelope;
mod publisher;

pub use config::{QueueConfig, RetryPolicy};
pub use consumer::{ConsumerReport, JobConsumer, Settlement, settle};
pub use envelope::JobEnvelope;
pub use publisher::NatsJobQueue;
