//! Aggregate function families.
//!
//! Families share a small accumulator trait. A state is updated once per
//! admitted row, can be merged with a partial state for the same group, and
//! finalizes into a value plus a validity flag (false for empty groups).

pub mod basic;
pub mod cumulative;
pub mod idx;
pub mod listagg;
pub mod nunique;
pub mod quantile;
pub mod varstd;
pub mod window;

use std::fmt::Debug;

use regatta_error::Result;

use crate::arrays::array::{Array, PhysicalPrimitive};
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::DataType;
use crate::grouping::{GroupMap, DROPPED};

pub trait AggregateState<Input, Output>: Default + Debug {
    /// Fold a partial state for the same group into this one.
    fn merge(&mut self, other: &mut Self) -> Result<()>;

    /// Account for one non-NULL input value.
    fn update(&mut self, input: Input) -> Result<()>;

    /// Produce the final value. The bool is false when the group saw no
    /// values; the output column gets NULL there.
    fn finalize(&mut self) -> Result<(Output, bool)>;
}

/// Update one state per group from a primitive column. NULL inputs and
/// dropped rows are skipped; rows arrive in input order, which is what makes
/// first/last style states correct.
pub(crate) fn update_states<T, O, S>(
    states: &mut [S],
    arr: &Array,
    group_ids: &[u32],
) -> Result<()>
where
    T: PhysicalPrimitive,
    S: AggregateState<T, O>,
{
    let values = arr.primitive_slice::<T>()?;
    for (row, &gid) in group_ids.iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            continue;
        }
        states[gid as usize].update(values[row])?;
    }
    Ok(())
}

/// Finalize states into a primitive output column.
pub(crate) fn finalize_states<I, T, S>(states: &mut [S], datatype: DataType) -> Result<Array>
where
    T: PhysicalPrimitive,
    S: AggregateState<I, T>,
{
    let mut values = Vec::with_capacity(states.len());
    let mut validity = Bitmap::with_capacity(states.len());
    for state in states {
        let (value, valid) = state.finalize()?;
        values.push(value);
        validity.push(valid);
    }
    Array::from_primitive_values(datatype, values, validity)
}

/// Materialize one output row per entry of `chosen`, pulling from the given
/// source rows. Entries with no source become NULL.
pub(crate) fn gather_optional(arr: &Array, chosen: &[Option<usize>]) -> Result<Array> {
    if arr.is_empty() {
        return Ok(Array::new_all_null(arr.datatype().clone(), chosen.len()));
    }
    let indices: Vec<usize> = chosen.iter().map(|c| c.unwrap_or(0)).collect();
    let mut out = crate::arrays::compute::take::take(arr, &indices)?;
    for (idx, choice) in chosen.iter().enumerate() {
        if choice.is_none() {
            out.validity.set_unchecked(idx, false);
        }
    }
    Ok(out)
}

/// Run the full state lifecycle for one primitive-typed aggregate.
pub(crate) fn reduce_primitive<T, O, S>(
    arr: &Array,
    map: &GroupMap,
    output_type: DataType,
) -> Result<Array>
where
    T: PhysicalPrimitive,
    O: PhysicalPrimitive,
    S: AggregateState<T, O>,
{
    let mut states: Vec<S> = (0..map.num_groups()).map(|_| S::default()).collect();
    update_states::<T, O, S>(&mut states, arr, map.group_ids())?;
    finalize_states::<T, O, S>(&mut states, output_type)
}
