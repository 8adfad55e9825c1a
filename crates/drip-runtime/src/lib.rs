#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod config;
mod cursor;
pub mod dispatcher;
pub mod engine;
mod error;
pub mod graph;
pub mod guard;
mod ids;
pub mod jobs;
pub mod memory;
pub mod model;
pub mod runner;
pub mod scheduler;
pub mod step;
pub mod store;

#[doc(hidden)]
pub mod prelude;

pub use config::{EngineConfig, EngineConfigBuilder, EngineConfigBuilderError};
pub use cursor::LedgerCursor;
pub use engine::{Collaborators, Engine, JobOutcome, SkipReason};
pub use error::{RuntimeError, RuntimeResult};
pub use ids::{AudienceId, AutomationId, ContactId, EmailId, LedgerEntryId, StepId, TagId};

/// Tracing target for per-contact step execution.
pub const TRACING_TARGET_RUNNER: &str = "drip_runtime::runner";

/// Tracing target for batch sweeps.
pub const TRACING_TARGET_SCHEDULER: &str = "drip_runtime::scheduler";

/// Tracing target for trigger dispatch.
pub const TRACING_TARGET_DISPATCHER: &str = "drip_runtime::dispatcher";

/// Tracing target for engine job handling and step writes.
pub const TRACING_TARGET_ENGINE: &str = "drip_runtime::engine";
