//! Associative reductions: sum, count, size, mean, min/max, first/last, the
//! boolean aggregates, and the bitwise aggregates.

use std::cmp::Ordering;
use std::marker::PhantomData;

use num_traits::{AsPrimitive, PrimInt};
use regatta_error::{ErrorKind, RegattaError, Result};
use serde::{Deserialize, Serialize};

use super::{gather_optional, reduce_primitive, AggregateState};
use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::bitmap::Bitmap;
use crate::arrays::compute::cmp::compare_values;
use crate::arrays::datatype::DataType;
use crate::grouping::{GroupMap, DROPPED};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasicOp {
    Sum,
    Count,
    /// Row count per group including NULL values.
    Size,
    Mean,
    Min,
    Max,
    First,
    Last,
    Any,
    All,
    BoolAnd,
    BoolOr,
    BoolXor,
    BitAnd,
    BitOr,
    BitXor,
}

impl BasicOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Size => "size",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::Any => "any",
            Self::All => "all",
            Self::BoolAnd => "bool_and",
            Self::BoolOr => "bool_or",
            Self::BoolXor => "bool_xor",
            Self::BitAnd => "bit_and",
            Self::BitOr => "bit_or",
            Self::BitXor => "bit_xor",
        }
    }

    /// Output type for a given input type, or an error if the function is
    /// undefined for it. Checked at plan time so all ranks fail before any
    /// communication.
    pub fn output_datatype(&self, input: &DataType) -> Result<DataType> {
        match self {
            Self::Count | Self::Size => Ok(DataType::Int64),
            Self::Sum => match input {
                DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                    Ok(DataType::Int64)
                }
                DataType::Int128 => Ok(DataType::Int128),
                DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                    Ok(DataType::UInt64)
                }
                DataType::Float32 | DataType::Float64 => Ok(DataType::Float64),
                DataType::Decimal128(meta) => Ok(DataType::Decimal128(*meta)),
                other => Err(undefined_for(*self, other)),
            },
            Self::Mean => {
                if input.is_numeric() {
                    Ok(DataType::Float64)
                } else {
                    Err(undefined_for(*self, input))
                }
            }
            Self::Min | Self::Max | Self::First | Self::Last => Ok(input.clone()),
            Self::Any | Self::All | Self::BoolAnd | Self::BoolOr | Self::BoolXor => {
                if input.is_bool_coercible() {
                    Ok(DataType::Boolean)
                } else {
                    Err(undefined_for(*self, input))
                }
            }
            Self::BitAnd | Self::BitOr | Self::BitXor => {
                if input.is_integer() {
                    Ok(input.clone())
                } else {
                    Err(undefined_for(*self, input))
                }
            }
        }
    }
}

fn undefined_for(op: BasicOp, datatype: &DataType) -> RegattaError {
    RegattaError::with_kind(ErrorKind::InvalidType, "Aggregate undefined for data type")
        .with_field("function", op.name())
        .with_field("datatype", datatype)
}

/// One output row per group.
pub fn compute_basic(op: BasicOp, input: Option<&Array>, map: &GroupMap) -> Result<Array> {
    match op {
        BasicOp::Size => Ok(size_column(map)),
        BasicOp::Count => count_column(required(input, op)?, map),
        BasicOp::Sum => sum_column(required(input, op)?, map),
        BasicOp::Mean => mean_column(required(input, op)?, map),
        BasicOp::Min => select_extremal(required(input, op)?, map, Ordering::Less),
        BasicOp::Max => select_extremal(required(input, op)?, map, Ordering::Greater),
        BasicOp::First => select_positional(required(input, op)?, map, false),
        BasicOp::Last => select_positional(required(input, op)?, map, true),
        BasicOp::Any | BasicOp::BoolOr => bool_column(required(input, op)?, map, BoolFold::Or),
        BasicOp::All | BasicOp::BoolAnd => bool_column(required(input, op)?, map, BoolFold::And),
        BasicOp::BoolXor => bool_column(required(input, op)?, map, BoolFold::Xor),
        BasicOp::BitAnd | BasicOp::BitOr | BasicOp::BitXor => {
            bit_column(required(input, op)?, map, op)
        }
    }
}

fn required<'a>(input: Option<&'a Array>, op: BasicOp) -> Result<&'a Array> {
    input.ok_or_else(|| {
        RegattaError::with_kind(ErrorKind::InvalidSchema, "Aggregate requires an input column")
            .with_field("function", op.name())
    })
}

fn size_column(map: &GroupMap) -> Array {
    Array::from_iter(map.group_sizes().into_iter().map(|s| s as i64))
}

fn count_column(arr: &Array, map: &GroupMap) -> Result<Array> {
    let mut counts = vec![0_i64; map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid != DROPPED && arr.is_valid(row) {
            counts[gid as usize] += 1;
        }
    }
    Ok(Array::from_iter(counts))
}

// Sum accumulators. Signed and unsigned integers widen through i128 and
// narrow at finalize; narrowing failure is an overflow error rather than a
// wrap.

#[derive(Debug, Default)]
pub struct SignedSumState<T> {
    sum: i128,
    seen: bool,
    _input: PhantomData<T>,
}

impl<T: PhysicalPrimitive + Into<i128>> AggregateState<T, i64> for SignedSumState<T> {
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        self.sum = checked_add(self.sum, other.sum)?;
        self.seen |= other.seen;
        Ok(())
    }

    fn update(&mut self, input: T) -> Result<()> {
        self.sum = checked_add(self.sum, input.into())?;
        self.seen = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(i64, bool)> {
        if !self.seen {
            return Ok((0, false));
        }
        let value = i64::try_from(self.sum).map_err(|_| {
            RegattaError::with_kind(ErrorKind::Overflow, "Integer sum out of range")
                .with_field("sum", self.sum)
        })?;
        Ok((value, true))
    }
}

#[derive(Debug, Default)]
pub struct UnsignedSumState<T> {
    sum: i128,
    seen: bool,
    _input: PhantomData<T>,
}

impl<T: PhysicalPrimitive + Into<i128>> AggregateState<T, u64> for UnsignedSumState<T> {
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        self.sum = checked_add(self.sum, other.sum)?;
        self.seen |= other.seen;
        Ok(())
    }

    fn update(&mut self, input: T) -> Result<()> {
        self.sum = checked_add(self.sum, input.into())?;
        self.seen = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(u64, bool)> {
        if !self.seen {
            return Ok((0, false));
        }
        let value = u64::try_from(self.sum).map_err(|_| {
            RegattaError::with_kind(ErrorKind::Overflow, "Unsigned sum out of range")
                .with_field("sum", self.sum)
        })?;
        Ok((value, true))
    }
}

#[derive(Debug, Default)]
pub struct FloatSumState<T> {
    sum: f64,
    seen: bool,
    _input: PhantomData<T>,
}

impl<T: PhysicalPrimitive + AsPrimitive<f64>> AggregateState<T, f64> for FloatSumState<T> {
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        self.sum += other.sum;
        self.seen |= other.seen;
        Ok(())
    }

    fn update(&mut self, input: T) -> Result<()> {
        self.sum += input.as_();
        self.seen = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(f64, bool)> {
        Ok((self.sum, self.seen))
    }
}

#[derive(Debug, Default)]
pub struct Int128SumState {
    sum: i128,
    seen: bool,
}

impl AggregateState<i128, i128> for Int128SumState {
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        self.sum = checked_add(self.sum, other.sum)?;
        self.seen |= other.seen;
        Ok(())
    }

    fn update(&mut self, input: i128) -> Result<()> {
        self.sum = checked_add(self.sum, input)?;
        self.seen = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(i128, bool)> {
        Ok((self.sum, self.seen))
    }
}

fn checked_add(a: i128, b: i128) -> Result<i128> {
    a.checked_add(b).ok_or_else(|| {
        RegattaError::with_kind(ErrorKind::Overflow, "Sum accumulator overflow")
    })
}

fn sum_column(arr: &Array, map: &GroupMap) -> Result<Array> {
    match arr.datatype() {
        DataType::Int8 => {
            reduce_primitive::<i8, i64, SignedSumState<i8>>(arr, map, DataType::Int64)
        }
        DataType::Int16 => {
            reduce_primitive::<i16, i64, SignedSumState<i16>>(arr, map, DataType::Int64)
        }
        DataType::Int32 => {
            reduce_primitive::<i32, i64, SignedSumState<i32>>(arr, map, DataType::Int64)
        }
        DataType::Int64 => {
            reduce_primitive::<i64, i64, SignedSumState<i64>>(arr, map, DataType::Int64)
        }
        DataType::Int128 => {
            reduce_primitive::<i128, i128, Int128SumState>(arr, map, DataType::Int128)
        }
        DataType::UInt8 => {
            reduce_primitive::<u8, u64, UnsignedSumState<u8>>(arr, map, DataType::UInt64)
        }
        DataType::UInt16 => {
            reduce_primitive::<u16, u64, UnsignedSumState<u16>>(arr, map, DataType::UInt64)
        }
        DataType::UInt32 => {
            reduce_primitive::<u32, u64, UnsignedSumState<u32>>(arr, map, DataType::UInt64)
        }
        DataType::UInt64 => {
            reduce_primitive::<u64, u64, UnsignedSumState<u64>>(arr, map, DataType::UInt64)
        }
        DataType::Float32 => {
            reduce_primitive::<f32, f64, FloatSumState<f32>>(arr, map, DataType::Float64)
        }
        DataType::Float64 => {
            reduce_primitive::<f64, f64, FloatSumState<f64>>(arr, map, DataType::Float64)
        }
        DataType::Decimal128(meta) => {
            let out = reduce_primitive::<i128, i128, Int128SumState>(
                arr,
                map,
                DataType::Decimal128(*meta),
            )?;
            check_decimal_precision(&out, meta.precision)?;
            Ok(out)
        }
        other => Err(undefined_for(BasicOp::Sum, other)),
    }
}

/// A decimal sum must fit the declared output precision; exceeding it raises
/// instead of wrapping or truncating.
fn check_decimal_precision(arr: &Array, precision: u8) -> Result<()> {
    let bound = 10_i128.pow(precision as u32);
    let values = arr.primitive_slice::<i128>()?;
    for (idx, &value) in values.iter().enumerate() {
        if arr.is_valid(idx) && (value <= -bound || value >= bound) {
            return Err(
                RegattaError::with_kind(ErrorKind::Overflow, "Decimal sum exceeds precision")
                    .with_field("precision", precision)
                    .with_field("value", value),
            );
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MeanState<T> {
    sum: f64,
    count: u64,
    _input: PhantomData<T>,
}

impl<T: PhysicalPrimitive + AsPrimitive<f64>> AggregateState<T, f64> for MeanState<T> {
    fn merge(&mut self, other: &mut Self) -> Result<()> {
        self.sum += other.sum;
        self.count += other.count;
        Ok(())
    }

    fn update(&mut self, input: T) -> Result<()> {
        self.sum += input.as_();
        self.count += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(f64, bool)> {
        if self.count == 0 {
            return Ok((0.0, false));
        }
        Ok((self.sum / self.count as f64, true))
    }
}

fn mean_column(arr: &Array, map: &GroupMap) -> Result<Array> {
    fn mean_prim<T: PhysicalPrimitive + AsPrimitive<f64>>(
        arr: &Array,
        map: &GroupMap,
    ) -> Result<Array> {
        reduce_primitive::<T, f64, MeanState<T>>(arr, map, DataType::Float64)
    }

    primitive_dispatch!(arr.datatype().physical_type(), mean_prim(arr, map), _other => {
        Err(undefined_for(BasicOp::Mean, arr.datatype()))
    })
}

/// Pick one source row per group by pairwise comparison (min/max). Ties keep
/// the earlier row, so first occurrence wins.
fn select_extremal(arr: &Array, map: &GroupMap, keep_when: Ordering) -> Result<Array> {
    let mut best: Vec<Option<usize>> = vec![None; map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            continue;
        }
        let slot = &mut best[gid as usize];
        match slot {
            None => *slot = Some(row),
            Some(current) => {
                if compare_values(arr, row, *current)? == keep_when {
                    *slot = Some(row);
                }
            }
        }
    }
    gather_optional(arr, &best)
}

/// Pick the first (or last) non-NULL row of each group.
fn select_positional(arr: &Array, map: &GroupMap, last: bool) -> Result<Array> {
    let mut chosen: Vec<Option<usize>> = vec![None; map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            continue;
        }
        let slot = &mut chosen[gid as usize];
        if last || slot.is_none() {
            *slot = Some(row);
        }
    }
    gather_optional(arr, &chosen)
}

#[derive(Debug, Clone, Copy)]
enum BoolFold {
    Or,
    And,
    Xor,
}

fn bool_column(arr: &Array, map: &GroupMap, fold: BoolFold) -> Result<Array> {
    if !arr.datatype().is_bool_coercible() {
        let op = match fold {
            BoolFold::Or => BasicOp::BoolOr,
            BoolFold::And => BasicOp::BoolAnd,
            BoolFold::Xor => BasicOp::BoolXor,
        };
        return Err(undefined_for(op, arr.datatype()));
    }

    let mut acc: Vec<Option<bool>> = vec![None; map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            continue;
        }
        let truth = truthy(arr, row)?;
        let slot = &mut acc[gid as usize];
        *slot = Some(match (*slot, fold) {
            (None, _) => truth,
            (Some(cur), BoolFold::Or) => cur || truth,
            (Some(cur), BoolFold::And) => cur && truth,
            (Some(cur), BoolFold::Xor) => cur ^ truth,
        });
    }

    let mut validity = Bitmap::with_capacity(acc.len());
    let mut values = Vec::with_capacity(acc.len());
    for slot in acc {
        validity.push(slot.is_some());
        values.push(slot.unwrap_or(false));
    }
    let mut out = Array::from_iter(values);
    out.validity = validity;
    Ok(out)
}

fn truthy(arr: &Array, row: usize) -> Result<bool> {
    fn truthy_prim<T: PhysicalPrimitive>(arr: &Array, row: usize) -> Result<bool> {
        Ok(arr.primitive_slice::<T>()?[row] != T::default())
    }

    match arr.datatype() {
        DataType::Boolean => arr.bool_value(row),
        _ => primitive_dispatch!(arr.datatype().physical_type(), truthy_prim(arr, row), _other => {
            Err(undefined_for(BasicOp::Any, arr.datatype()))
        }),
    }
}

fn bit_column(arr: &Array, map: &GroupMap, op: BasicOp) -> Result<Array> {
    fn bit_prim<T: PhysicalPrimitive + PrimInt>(
        arr: &Array,
        map: &GroupMap,
        op: BasicOp,
    ) -> Result<Array> {
        let values = arr.primitive_slice::<T>()?;
        let mut acc: Vec<Option<T>> = vec![None; map.num_groups()];
        for (row, &gid) in map.group_ids().iter().enumerate() {
            if gid == DROPPED || !arr.is_valid(row) {
                continue;
            }
            let v = values[row];
            let slot = &mut acc[gid as usize];
            *slot = Some(match (*slot, op) {
                (None, _) => v,
                (Some(cur), BasicOp::BitAnd) => cur & v,
                (Some(cur), BasicOp::BitOr) => cur | v,
                (Some(cur), BasicOp::BitXor) => cur ^ v,
                (Some(_), other) => {
                    return Err(RegattaError::new("Unexpected bitwise op")
                        .with_field("function", other.name()))
                }
            });
        }

        let mut validity = Bitmap::with_capacity(acc.len());
        let mut out = Vec::with_capacity(acc.len());
        for slot in acc {
            validity.push(slot.is_some());
            out.push(slot.unwrap_or_else(T::zero));
        }
        Array::from_primitive_values(arr.datatype().clone(), out, validity)
    }

    match arr.datatype() {
        DataType::Int8 => bit_prim::<i8>(arr, map, op),
        DataType::Int16 => bit_prim::<i16>(arr, map, op),
        DataType::Int32 => bit_prim::<i32>(arr, map, op),
        DataType::Int64 => bit_prim::<i64>(arr, map, op),
        DataType::Int128 => bit_prim::<i128>(arr, map, op),
        DataType::UInt8 => bit_prim::<u8>(arr, map, op),
        DataType::UInt16 => bit_prim::<u16>(arr, map, op),
        DataType::UInt32 => bit_prim::<u32>(arr, map, op),
        DataType::UInt64 => bit_prim::<u64>(arr, map, op),
        other => Err(undefined_for(op, other)),
    }
}
