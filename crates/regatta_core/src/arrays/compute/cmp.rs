use std::cmp::Ordering;

use regatta_error::Result;

use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::datatype::PhysicalType;

/// A column participating in a multi-column sort.
#[derive(Debug, Clone, Copy)]
pub struct SortColumn<'a> {
    pub array: &'a Array,
    pub desc: bool,
    pub nulls_first: bool,
}

impl<'a> SortColumn<'a> {
    pub fn asc(array: &'a Array) -> Self {
        SortColumn {
            array,
            desc: false,
            nulls_first: false,
        }
    }
}

/// Compare two rows across the given sort columns.
///
/// Ties on earlier columns fall through to later ones. Callers wanting a
/// stable sort should break final ties on row index.
pub fn compare_rows(cols: &[SortColumn], left: usize, right: usize) -> Result<Ordering> {
    for col in cols {
        let ord = compare_values(col.array, left, right)?;
        let ord = apply_sort_options(ord, col.desc, col.nulls_first, col.array, left, right);
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(Ordering::Equal)
}

fn apply_sort_options(
    ord: Ordering,
    desc: bool,
    nulls_first: bool,
    arr: &Array,
    left: usize,
    right: usize,
) -> Ordering {
    let left_null = !arr.is_valid(left);
    let right_null = !arr.is_valid(right);

    // NULL placement is independent of asc/desc.
    if left_null || right_null {
        return match (left_null, right_null) {
            (true, true) => Ordering::Equal,
            (true, false) => {
                if nulls_first {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (false, true) => {
                if nulls_first {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (false, false) => unreachable!(),
        };
    }

    if desc {
        ord.reverse()
    } else {
        ord
    }
}

/// Stable-sort row indices by the given sort columns. Stability makes ties
/// fall back to the incoming order.
pub fn sort_rows_by(rows: &mut [usize], cols: &[SortColumn]) -> Result<()> {
    let mut sort_err: Option<regatta_error::RegattaError> = None;
    rows.sort_by(|&a, &b| match compare_rows(cols, a, b) {
        Ok(ord) => ord,
        Err(err) => {
            sort_err.get_or_insert(err);
            Ordering::Equal
        }
    });
    match sort_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Compare the values of two rows within one array.
///
/// NULLs compare equal to everything here; callers handle NULL placement.
pub fn compare_values(arr: &Array, left: usize, right: usize) -> Result<Ordering> {
    if !arr.is_valid(left) || !arr.is_valid(right) {
        return Ok(Ordering::Equal);
    }

    match arr.datatype().physical_type() {
        PhysicalType::Boolean => Ok(arr.bool_value(left)?.cmp(&arr.bool_value(right)?)),
        PhysicalType::Utf8 => Ok(arr.utf8_value(left)?.cmp(arr.utf8_value(right)?)),
        PhysicalType::Binary => Ok(arr.binary_value(left)?.cmp(arr.binary_value(right)?)),
        phys => primitive_dispatch!(phys, compare_primitive(arr, left, right), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        }),
    }
}

fn compare_primitive<T: PhysicalPrimitive>(
    arr: &Array,
    left: usize,
    right: usize,
) -> Result<Ordering> {
    let values = arr.primitive_slice::<T>()?;
    Ok(values[left].total_cmp(&values[right]))
}

/// Check whether two rows (possibly in different arrays) hold equal values.
///
/// NULL equals NULL; that is what makes NULL usable as a key value.
pub fn rows_eq(
    left_cols: &[&Array],
    left_row: usize,
    right_cols: &[&Array],
    right_row: usize,
) -> Result<bool> {
    debug_assert_eq!(left_cols.len(), right_cols.len());

    for (l, r) in left_cols.iter().zip(right_cols) {
        let l_null = !l.is_valid(left_row);
        let r_null = !r.is_valid(right_row);
        if l_null != r_null {
            return Ok(false);
        }
        if l_null {
            continue;
        }
        if !values_eq(l, left_row, r, right_row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn values_eq(left: &Array, left_row: usize, right: &Array, right_row: usize) -> Result<bool> {
    match left.datatype().physical_type() {
        PhysicalType::Boolean => Ok(left.bool_value(left_row)? == right.bool_value(right_row)?),
        PhysicalType::Utf8 => Ok(left.utf8_value(left_row)? == right.utf8_value(right_row)?),
        PhysicalType::Binary => Ok(left.binary_value(left_row)? == right.binary_value(right_row)?),
        phys => primitive_dispatch!(phys, primitive_eq(left, left_row, right, right_row), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        }),
    }
}

fn primitive_eq<T: PhysicalPrimitive>(
    left: &Array,
    left_row: usize,
    right: &Array,
    right_row: usize,
) -> Result<bool> {
    let l = left.primitive_slice::<T>()?[left_row];
    let r = right.primitive_slice::<T>()?[right_row];
    // Bitwise-exact equality for floats keeps grouping consistent with the
    // hash function.
    Ok(l.total_cmp(&r) == Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nulls_equal_for_keys() {
        let a = Array::from_iter([Some(1_i64), None]);
        let b = Array::from_iter([None, Some(1_i64)]);
        assert!(rows_eq(&[&a], 1, &[&b], 0).unwrap());
        assert!(!rows_eq(&[&a], 0, &[&b], 0).unwrap());
    }

    #[test]
    fn desc_reverses_values_not_nulls() {
        let arr = Array::from_iter([Some(1_i32), Some(2), None]);
        let cols = [SortColumn {
            array: &arr,
            desc: true,
            nulls_first: false,
        }];
        assert_eq!(Ordering::Greater, compare_rows(&cols, 0, 1).unwrap());
        // NULL still sorts last.
        assert_eq!(Ordering::Greater, compare_rows(&cols, 2, 0).unwrap());
    }

    #[test]
    fn multi_column_tiebreak() {
        let a = Array::from_iter(["x", "x"]);
        let b = Array::from_iter([2_i64, 1]);
        let cols = [SortColumn::asc(&a), SortColumn::asc(&b)];
        assert_eq!(Ordering::Greater, compare_rows(&cols, 0, 1).unwrap());
    }
}
