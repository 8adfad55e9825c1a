//! Filter model value objects.
//!
//! A filter is a two-level boolean tree:
//!
//! ```text
//! FilterGroups (AND | OR)
//! ├── ConditionGroup (AND | OR)
//! │   ├── FilterCondition { field, operator, value }
//! │   └── ...
//! └── ...
//! ```
//!
//! The types here carry no behavior beyond structural validation; see
//! [`compile`](crate::compile) for turning them into a [`Predicate`](crate::Predicate).

mod condition;
mod field;
mod operator;
mod property;
mod value;
mod window;

pub use condition::{ConditionGroup, FilterCondition, FilterGroups, GroupOperator};
pub use field::{FieldClass, FilterField};
pub use operator::FilterOperator;
pub use property::PropertyKind;
pub use value::{FilterValue, ScalarValue};
pub use window::TimeWindow;
