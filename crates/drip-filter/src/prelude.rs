//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types for ergonomic imports:
//!
//! ```rust
//! use drip_filter::prelude::*;
//! ```

pub use crate::compiler::{AudienceContext, UnknownPropertyPolicy, compile};
pub use crate::error::{FilterError, FilterResult};
pub use crate::model::{
    ConditionGroup, FilterCondition, FilterField, FilterGroups, FilterOperator, FilterValue,
    GroupOperator, PropertyKind,
};
pub use crate::predicate::{
    ActivityColumn, ContactColumn, Membership, Predicate, PropertyValue, Subject,
};
