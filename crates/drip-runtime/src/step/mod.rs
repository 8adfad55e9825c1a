//! Per-subtype step configuration and write-time validation.

mod config;
mod validate;

pub use config::{
    AttributeValue, IfElseConfig, StepConfig, TagTriggerConfig, TriggerConfig,
    UpdateAttributesConfig, WaitConfig, WaitUnit,
};
pub use validate::{validate_automation, validate_step};
