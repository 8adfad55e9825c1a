//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use drip_runtime::prelude::*;
//! ```

pub use crate::config::{EngineConfig, EngineConfigBuilder};
pub use crate::engine::{Collaborators, Engine, JobOutcome, SkipReason};
pub use crate::error::{RuntimeError, RuntimeResult};
pub use crate::graph::AutomationGraph;
pub use crate::ids::{AudienceId, AutomationId, ContactId, EmailId, StepId, TagId};
pub use crate::jobs::{AutomationJob, EnqueueOptions, TriggerEvent};
pub use crate::model::{
    Automation, AutomationStatus, AutomationStep, Branch, Contact, ContactStatus, LedgerEntry,
    LedgerStatus, StepSubtype, StepType,
};
pub use crate::store::{AutomationStore, Clock, ContactStore, EmailSender, JobQueue, LedgerStore};
