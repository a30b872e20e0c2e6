//! LISTAGG: per-group string concatenation with a caller-chosen separator
//! and an optional WITHIN GROUP ordering.

use regatta_error::{ErrorKind, RegattaError, Result};

use crate::arrays::array::Array;
use crate::arrays::bitmap::Bitmap;
use crate::arrays::compute::cmp::{sort_rows_by, SortColumn};
use crate::arrays::datatype::DataType;
use crate::arrays::storage::Utf8Storage;
use crate::grouping::GroupMap;

/// One string per group. NULL values are skipped; a group with no non-NULL
/// values yields NULL. `order_cols` (possibly empty) sorts values before
/// concatenation, with ties kept in original row order.
pub fn compute_listagg(
    values: &Array,
    order_cols: &[SortColumn],
    map: &GroupMap,
    separator: &str,
) -> Result<Array> {
    if values.datatype() != &DataType::Utf8 {
        return Err(
            RegattaError::with_kind(ErrorKind::InvalidType, "LISTAGG requires a string column")
                .with_field("datatype", values.datatype()),
        );
    }

    let mut storage = Utf8Storage::with_capacity(map.num_groups());
    let mut validity = Bitmap::with_capacity(map.num_groups());

    for mut rows in map.row_lists() {
        if !order_cols.is_empty() {
            sort_rows_by(&mut rows, order_cols)?;
        }

        let mut joined = String::new();
        let mut any = false;
        for &row in &rows {
            if !values.is_valid(row) {
                continue;
            }
            if any {
                joined.push_str(separator);
            }
            joined.push_str(values.utf8_value(row)?);
            any = true;
        }

        storage.try_push(&joined)?;
        validity.push(any);
    }

    Array::new_with_validity(DataType::Utf8, storage, validity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::scalar::ScalarValue;

    #[test]
    fn ordered_by_secondary_column() {
        let keys = Array::from_iter([1_i64, 1]);
        let vals = Array::from_iter(["y", "x"]);
        let order = Array::from_iter([2_i64, 1]);
        let map = GroupMap::build(&[&keys], 2, true).unwrap();

        let out = compute_listagg(&vals, &[SortColumn::asc(&order)], &map, "-").unwrap();
        assert_eq!("x-y", out.utf8_value(0).unwrap());
    }

    #[test]
    fn unordered_keeps_row_order() {
        let keys = Array::from_iter([1_i64, 2, 1]);
        let vals = Array::from_iter(["b", "z", "a"]);
        let map = GroupMap::build(&[&keys], 3, true).unwrap();
        let out = compute_listagg(&vals, &[], &map, ",").unwrap();
        assert_eq!("b,a", out.utf8_value(0).unwrap());
        assert_eq!("z", out.utf8_value(1).unwrap());
    }

    #[test]
    fn nulls_skipped_and_empty_group_null() {
        let keys = Array::from_iter([1_i64, 1, 2]);
        let vals = Array::from_iter([Some("a"), None, None::<&str>]);
        let map = GroupMap::build(&[&keys], 3, true).unwrap();
        let out = compute_listagg(&vals, &[], &map, "-").unwrap();
        assert_eq!(ScalarValue::from("a"), out.value(0).unwrap());
        assert_eq!(ScalarValue::Null, out.value(1).unwrap());
    }

    #[test]
    fn ties_stable_by_original_order() {
        let keys = Array::from_iter([1_i64, 1, 1]);
        let vals = Array::from_iter(["b", "a", "c"]);
        let order = Array::from_iter([1_i64, 1, 1]);
        let map = GroupMap::build(&[&keys], 3, true).unwrap();
        let out = compute_listagg(&vals, &[SortColumn::asc(&order)], &map, "").unwrap();
        assert_eq!("bac", out.utf8_value(0).unwrap());
    }

    #[test]
    fn non_string_input_rejected() {
        let keys = Array::from_iter([1_i64]);
        let vals = Array::from_iter([1_i64]);
        let map = GroupMap::build(&[&keys], 1, true).unwrap();
        let err = compute_listagg(&vals, &[], &map, "-").unwrap_err();
        assert_eq!(ErrorKind::InvalidType, err.kind());
    }
}
