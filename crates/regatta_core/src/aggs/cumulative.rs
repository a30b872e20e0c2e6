//! Order-sensitive, row-shaped aggregates: cumulative ops, shift, and
//! transform (a reduction broadcast back to every row of its group).
//!
//! These walk rows in input order, which after a shuffle is the original
//! global order. `skipna` controls NULL handling: skipped NULLs leave the
//! running state untouched (the row itself is NULL); without `skipna` a NULL
//! poisons the rest of its group.

use num_traits::NumCast;
use regatta_error::{ErrorKind, RegattaError, Result};
use serde::{Deserialize, Serialize};

use super::gather_optional;
use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::DataType;
use crate::grouping::{GroupMap, DROPPED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CumOp {
    Sum,
    Prod,
    Min,
    Max,
}

impl CumOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "cumsum",
            Self::Prod => "cumprod",
            Self::Min => "cummin",
            Self::Max => "cummax",
        }
    }
}

/// One output per input row; same data type as the input.
pub fn compute_cumulative(
    arr: &Array,
    map: &GroupMap,
    op: CumOp,
    skipna: bool,
) -> Result<Array> {
    match op {
        CumOp::Min | CumOp::Max => {
            primitive_dispatch!(
                arr.datatype().physical_type(),
                cum_minmax(arr, map, op == CumOp::Min, skipna),
                other => Err(undefined(op, other))
            )
        }
        CumOp::Sum | CumOp::Prod => match arr.datatype() {
            DataType::Int8 => cum_int::<i8>(arr, map, op, skipna),
            DataType::Int16 => cum_int::<i16>(arr, map, op, skipna),
            DataType::Int32 => cum_int::<i32>(arr, map, op, skipna),
            DataType::Int64 => cum_int::<i64>(arr, map, op, skipna),
            DataType::Int128 => cum_int::<i128>(arr, map, op, skipna),
            DataType::UInt8 => cum_int::<u8>(arr, map, op, skipna),
            DataType::UInt16 => cum_int::<u16>(arr, map, op, skipna),
            DataType::UInt32 => cum_int::<u32>(arr, map, op, skipna),
            DataType::UInt64 => cum_int::<u64>(arr, map, op, skipna),
            DataType::Float32 => cum_float::<f32>(arr, map, op, skipna),
            DataType::Float64 => cum_float::<f64>(arr, map, op, skipna),
            DataType::Decimal128(meta) if op == CumOp::Sum => {
                cum_decimal_sum(arr, map, meta.precision, skipna)
            }
            other => Err(RegattaError::with_kind(
                ErrorKind::InvalidType,
                "Cumulative op undefined for data type",
            )
            .with_field("function", op.name())
            .with_field("datatype", other)),
        },
    }
}

fn undefined(op: CumOp, physical: impl std::fmt::Display) -> RegattaError {
    RegattaError::with_kind(
        ErrorKind::InvalidType,
        "Cumulative op undefined for data type",
    )
    .with_field("function", op.name())
    .with_field("physical", physical)
}

/// Shared row walk. `advance` folds a value into the group accumulator and
/// yields the emitted value, or errors (overflow).
fn cum_walk<T, A, F>(
    arr: &Array,
    map: &GroupMap,
    skipna: bool,
    init: A,
    mut advance: F,
) -> Result<Array>
where
    T: PhysicalPrimitive,
    A: Clone,
    F: FnMut(&mut A, T) -> Result<T>,
{
    let values = arr.primitive_slice::<T>()?;
    let mut accs: Vec<A> = vec![init; map.num_groups()];
    let mut poisoned = vec![false; map.num_groups()];

    let mut out = Vec::with_capacity(values.len());
    let mut validity = Bitmap::with_capacity(values.len());
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || poisoned.get(gid as usize).copied().unwrap_or(false) {
            out.push(T::default());
            validity.push(false);
            continue;
        }
        if !arr.is_valid(row) {
            if !skipna {
                poisoned[gid as usize] = true;
            }
            out.push(T::default());
            validity.push(false);
            continue;
        }
        out.push(advance(&mut accs[gid as usize], values[row])?);
        validity.push(true);
    }
    Array::from_primitive_values(arr.datatype().clone(), out, validity)
}

fn cum_int<T>(arr: &Array, map: &GroupMap, op: CumOp, skipna: bool) -> Result<Array>
where
    T: PhysicalPrimitive + Into<i128> + NumCast,
{
    let init: Option<i128> = None;
    cum_walk::<T, _, _>(arr, map, skipna, init, move |acc, v| {
        let next = match (*acc, op) {
            (None, _) => v.into(),
            (Some(cur), CumOp::Sum) => cur.checked_add(v.into()).ok_or_else(overflow)?,
            (Some(cur), CumOp::Prod) => cur.checked_mul(v.into()).ok_or_else(overflow)?,
            (Some(_), _) => unreachable!("min/max handled separately"),
        };
        *acc = Some(next);
        num_traits::cast::<i128, T>(next).ok_or_else(overflow)
    })
}

fn cum_float<T>(arr: &Array, map: &GroupMap, op: CumOp, skipna: bool) -> Result<Array>
where
    T: PhysicalPrimitive + NumCast + Into<f64>,
{
    let init: Option<f64> = None;
    cum_walk::<T, _, _>(arr, map, skipna, init, move |acc, v| {
        let next = match (*acc, op) {
            (None, _) => v.into(),
            (Some(cur), CumOp::Sum) => cur + v.into(),
            (Some(cur), CumOp::Prod) => cur * v.into(),
            (Some(_), _) => unreachable!("min/max handled separately"),
        };
        *acc = Some(next);
        num_traits::cast::<f64, T>(next)
            .ok_or_else(|| RegattaError::new("Float accumulator not representable"))
    })
}

fn cum_decimal_sum(arr: &Array, map: &GroupMap, precision: u8, skipna: bool) -> Result<Array> {
    let bound = 10_i128.pow(precision as u32);
    let init: i128 = 0;
    cum_walk::<i128, _, _>(arr, map, skipna, init, move |acc, v| {
        *acc = acc.checked_add(v).ok_or_else(overflow)?;
        if *acc <= -bound || *acc >= bound {
            return Err(RegattaError::with_kind(
                ErrorKind::Overflow,
                "Decimal cumulative sum exceeds precision",
            )
            .with_field("precision", precision));
        }
        Ok(*acc)
    })
}

fn cum_minmax<T: PhysicalPrimitive>(
    arr: &Array,
    map: &GroupMap,
    want_min: bool,
    skipna: bool,
) -> Result<Array> {
    let init: Option<T> = None;
    cum_walk::<T, _, _>(arr, map, skipna, init, move |acc, v| {
        let next = match *acc {
            None => v,
            Some(cur) => {
                let less = v.total_cmp(&cur) == std::cmp::Ordering::Less;
                if less == want_min {
                    v
                } else {
                    cur
                }
            }
        };
        *acc = Some(next);
        Ok(next)
    })
}

fn overflow() -> RegattaError {
    RegattaError::with_kind(ErrorKind::Overflow, "Cumulative accumulator overflow")
}

/// Shift values within each group by `offset` positions (positive looks
/// back, negative looks forward). Rows with no source become NULL.
pub fn compute_shift(arr: &Array, map: &GroupMap, offset: i64) -> Result<Array> {
    let mut chosen: Vec<Option<usize>> = vec![None; arr.len()];
    for rows in map.row_lists() {
        for (pos, &row) in rows.iter().enumerate() {
            let src = pos as i64 - offset;
            if src >= 0 && (src as usize) < rows.len() {
                chosen[row] = Some(rows[src as usize]);
            }
        }
    }
    gather_optional(arr, &chosen)
}

/// Broadcast a per-group reduction back to every row of its group. Rows
/// dropped from grouping become NULL.
pub fn broadcast_to_rows(reduced: &Array, map: &GroupMap) -> Result<Array> {
    let chosen: Vec<Option<usize>> = map
        .group_ids()
        .iter()
        .map(|&gid| {
            if gid == DROPPED {
                None
            } else {
                Some(gid as usize)
            }
        })
        .collect();
    gather_optional(reduced, &chosen)
}

/// Add a per-group base offset to an Int64 running-total column. Used by the
/// cross-rank running-total propagation; must stay result-equivalent to the
/// reverse-shuffle path.
pub fn add_bases_i64(arr: &Array, map: &GroupMap, bases: &[i128]) -> Result<Array> {
    let values = arr.primitive_slice::<i64>()?;
    let mut out = Vec::with_capacity(values.len());
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            out.push(0);
            continue;
        }
        let sum = (values[row] as i128)
            .checked_add(bases[gid as usize])
            .ok_or_else(overflow)?;
        out.push(i64::try_from(sum).map_err(|_| overflow())?);
    }
    Array::from_primitive_values(DataType::Int64, out, arr.validity().clone())
}

/// Float64 variant of [`add_bases_i64`].
pub fn add_bases_f64(arr: &Array, map: &GroupMap, bases: &[f64]) -> Result<Array> {
    let values = arr.primitive_slice::<f64>()?;
    let mut out = Vec::with_capacity(values.len());
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            out.push(0.0);
            continue;
        }
        out.push(values[row] + bases[gid as usize]);
    }
    Array::from_primitive_values(DataType::Float64, out, arr.validity().clone())
}
