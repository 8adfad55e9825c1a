//! Persisted engine entities.

mod automation;
mod contact;
mod ledger;
mod step;

pub use automation::{Automation, AutomationStatus};
pub use contact::{Contact, ContactStatus};
pub use ledger::{LedgerEntry, LedgerStatus};
pub use step::{AutomationStep, Branch, StepSubtype, StepType};
