//! idxmin / idxmax: the original row label of each group's extremal value.

use std::cmp::Ordering;

use regatta_error::{RegattaError, Result};

use super::gather_optional;
use crate::arrays::array::Array;
use crate::arrays::compute::cmp::compare_values;
use crate::grouping::{GroupMap, DROPPED};

/// One label per group: the label of the row holding the group's minimum (or
/// maximum) value. Ties keep the first occurrence in original row order,
/// which is the scan order here since shuffles preserve it.
///
/// `labels` carries each row's original global label, built by the caller
/// from per-rank row offsets.
pub fn compute_idx(
    values: &Array,
    labels: &Array,
    map: &GroupMap,
    want_min: bool,
) -> Result<Array> {
    if values.len() != labels.len() {
        return Err(RegattaError::new("Label column length mismatch")
            .with_field("values", values.len())
            .with_field("labels", labels.len()));
    }

    let keep_when = if want_min {
        Ordering::Less
    } else {
        Ordering::Greater
    };

    let mut best: Vec<Option<usize>> = vec![None; map.num_groups()];
    for (row, &gid) in map.group_ids().iter().enumerate() {
        if gid == DROPPED || !values.is_valid(row) {
            continue;
        }
        let slot = &mut best[gid as usize];
        match slot {
            None => *slot = Some(row),
            Some(current) => {
                if compare_values(values, row, *current)? == keep_when {
                    *slot = Some(row);
                }
            }
        }
    }

    gather_optional(labels, &best)
}
