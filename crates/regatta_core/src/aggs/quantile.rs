//! Exact median / quantile by per-group sort.
//!
//! Numeric inputs produce Float64 with linear interpolation between the two
//! bracketing order statistics. Decimal inputs stay in fixed point: the
//! interpolation runs in scaled i128 arithmetic and the output keeps the
//! input's precision and scale.

use num_traits::AsPrimitive;
use regatta_error::{ErrorKind, RegattaError, Result};

use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::{DataType, DecimalTypeMeta};
use crate::grouping::{GroupMap, DROPPED};

pub fn compute_median(arr: &Array, map: &GroupMap) -> Result<Array> {
    compute_quantile(arr, map, 0.5)
}

pub fn compute_quantile(arr: &Array, map: &GroupMap, q: f64) -> Result<Array> {
    if !(0.0..=1.0).contains(&q) {
        return Err(
            RegattaError::with_kind(ErrorKind::InvalidSchema, "Quantile must be in [0, 1]")
                .with_field("q", q),
        );
    }

    match arr.datatype() {
        DataType::Decimal128(meta) => decimal_quantile(arr, map, q, *meta),
        dt if dt.is_numeric() => {
            primitive_dispatch!(dt.physical_type(), float_quantile(arr, map, q), other => {
                Err(RegattaError::with_kind(
                    ErrorKind::InvalidType,
                    "Quantile undefined for data type",
                )
                .with_field("physical", other))
            })
        }
        other => Err(RegattaError::with_kind(
            ErrorKind::InvalidType,
            "Quantile undefined for data type",
        )
        .with_field("datatype", other)),
    }
}

fn group_values<T: PhysicalPrimitive>(arr: &Array, map: &GroupMap) -> Result<Vec<Vec<T>>> {
    let values = arr.primitive_slice::<T>()?;
    let mut groups: Vec<Vec<T>> = vec![Vec::new(); map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !arr.is_valid(row) {
            continue;
        }
        groups[gid as usize].push(values[row]);
    }
    Ok(groups)
}

fn float_quantile<T: PhysicalPrimitive + AsPrimitive<f64>>(
    arr: &Array,
    map: &GroupMap,
    q: f64,
) -> Result<Array> {
    let mut groups = group_values::<T>(arr, map)?;

    let mut out = Vec::with_capacity(groups.len());
    let mut validity = Bitmap::with_capacity(groups.len());
    for group in &mut groups {
        if group.is_empty() {
            out.push(0.0);
            validity.push(false);
            continue;
        }
        group.sort_unstable_by(|a, b| a.total_cmp(b));

        let pos = q * (group.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let lo_v: f64 = group[lo].as_();
        let hi_v: f64 = group[hi].as_();
        out.push(lo_v + (hi_v - lo_v) * (pos - lo as f64));
        validity.push(true);
    }
    Array::from_primitive_values(DataType::Float64, out, validity)
}

fn decimal_quantile(
    arr: &Array,
    map: &GroupMap,
    q: f64,
    meta: DecimalTypeMeta,
) -> Result<Array> {
    let mut groups = group_values::<i128>(arr, map)?;

    let mut out = Vec::with_capacity(groups.len());
    let mut validity = Bitmap::with_capacity(groups.len());
    for group in &mut groups {
        if group.is_empty() {
            out.push(0);
            validity.push(false);
            continue;
        }
        group.sort_unstable();

        let pos = q * (group.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        out.push(interpolate_fixed(group[lo], group[hi], pos - lo as f64));
        validity.push(true);
    }
    Array::from_primitive_values(DataType::Decimal128(meta), out, validity)
}

/// Interpolate between two scaled decimal values without going through
/// floating point. The fraction is quantized to 32 bits; results round half
/// away from zero at the input scale.
fn interpolate_fixed(lo: i128, hi: i128, frac: f64) -> i128 {
    const DEN: i128 = 1 << 32;
    let num = (frac * DEN as f64).round() as i128;
    let prod = (hi - lo) * num;
    let adj = if prod >= 0 { DEN / 2 } else { -(DEN / 2) };
    lo + (prod + adj) / DEN
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_for(keys: &Array) -> GroupMap {
        GroupMap::build(&[keys], keys.len(), true).unwrap()
    }

    #[test]
    fn median_odd_and_even() {
        let keys = Array::from_iter([1_i64, 1, 1, 2, 2]);
        let vals = Array::from_iter([3_i64, 1, 2, 10, 20]);
        let out = compute_median(&vals, &map_for(&keys)).unwrap();
        let medians = out.primitive_slice::<f64>().unwrap();
        assert_eq!(2.0, medians[0]);
        assert_eq!(15.0, medians[1]);
    }

    #[test]
    fn quantile_bounds_are_min_max() {
        let keys = Array::from_iter([1_i64, 1, 1]);
        let vals = Array::from_iter([5.0_f64, -1.0, 3.0]);
        let map = map_for(&keys);
        let q0 = compute_quantile(&vals, &map, 0.0).unwrap();
        let q1 = compute_quantile(&vals, &map, 1.0).unwrap();
        assert_eq!(-1.0, q0.primitive_slice::<f64>().unwrap()[0]);
        assert_eq!(5.0, q1.primitive_slice::<f64>().unwrap()[0]);
    }

    #[test]
    fn decimal_median_stays_decimal() {
        let meta = DecimalTypeMeta::new(10, 2);
        let keys = Array::from_iter([1_i64, 1]);
        // 1.25 and 1.50 -> median 1.38 (rounded at scale 2).
        let vals = Array::from_primitive_values::<i128>(
            DataType::Decimal128(meta),
            vec![125, 150],
            Bitmap::new_with_all_true(2),
        )
        .unwrap();
        let out = compute_median(&vals, &map_for(&keys)).unwrap();
        assert_eq!(&DataType::Decimal128(meta), out.datatype());
        assert_eq!(138_i128, out.primitive_slice::<i128>().unwrap()[0]);
    }

    #[test]
    fn empty_group_is_null() {
        let keys = Array::from_iter([1_i64]);
        let vals = Array::from_iter([None::<f64>]);
        let out = compute_median(&vals, &map_for(&keys)).unwrap();
        assert!(!out.is_valid(0));
    }

    #[test]
    fn out_of_range_quantile_rejected() {
        let keys = Array::from_iter([1_i64]);
        let vals = Array::from_iter([1.0_f64]);
        let err = compute_quantile(&vals, &map_for(&keys), 1.5).unwrap_err();
        assert_eq!(ErrorKind::InvalidSchema, err.kind());
    }
}
