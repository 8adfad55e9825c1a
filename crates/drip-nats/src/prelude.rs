//! Prelude module for drip-nats.
//!
//! ```rust,ignore
//! use drip_nats::prelude::*;
//!
//! let client = NatsClient::connect(NatsConfig::new("nats://localhost:4222", "token")).await?;
//! let queue = NatsJobQueue::new(&client, QueueConfig::default()).await?;
//! ```

pub use crate::client::{NatsClient, NatsConfig};
pub use crate::queue::{
    ConsumerReport, JobConsumer, JobEnvelope, NatsJobQueue, QueueConfig, RetryPolicy,
};
pub use crate::{Error, Result};
