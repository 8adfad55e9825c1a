#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod compiler;
mod error;
pub mod model;
pub mod predicate;
pub mod sql;

#[doc(hidden)]
pub mod prelude;

pub use compiler::{AudienceContext, UnknownPropertyPolicy, compile};
pub use error::{FilterError, FilterResult};
pub use model::{
    ConditionGroup, FieldClass, FilterCondition, FilterField, FilterGroups, FilterOperator,
    FilterValue, GroupOperator, PropertyKind, ScalarValue, TimeWindow,
};
pub use predicate::{
    ActivityColumn, ContactColumn, Membership, Predicate, PropertyValue, Subject,
};
pub use sql::{SqlBind, SqlFragment};

/// Tracing target for filter compilation.
pub const TRACING_TARGET_COMPILER: &str = "drip_filter::compiler";
