//! Planning and execution of distributed grouped aggregations.

mod assemble;
pub mod exec;
pub mod spec;

pub use exec::execute_group_by;
pub use spec::{AggFunction, AggregateSpec, GroupBySpec, SortKey};
