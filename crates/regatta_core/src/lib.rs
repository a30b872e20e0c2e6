//! Distributed columnar GROUP BY and aggregation.
//!
//! The engine runs single-program-multiple-data: every rank holds an
//! arbitrary horizontal slice of one logical table and calls
//! [`engine::execute_group_by`] with an identical [`engine::GroupBySpec`].
//! Rows are shuffled so each group lands on one rank, grouped with a hash
//! table, aggregated per family, and assembled into a result table (one row
//! per group, or one row per input row for the order-sensitive families,
//! which are reverse-shuffled back to where their inputs came from).
//!
//! Communication goes through [`cluster::Communicator`]; an in-process
//! implementation backed by channels lives in [`cluster::local`] and is what
//! the tests run on.

pub mod aggs;
pub mod arrays;
pub mod cluster;
pub mod engine;
pub mod grouping;
pub mod shuffle;

pub use engine::{execute_group_by, AggFunction, AggregateSpec, GroupBySpec, SortKey};
