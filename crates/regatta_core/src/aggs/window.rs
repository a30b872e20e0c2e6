//! Window functions: partition by the group keys, order within the
//! partition, evaluate over a ROWS frame, one output per input row.

use std::cmp::Ordering;

use regatta_error::{ErrorKind, RegattaError, Result};
use serde::{Deserialize, Serialize};

use super::gather_optional;
use crate::arrays::array::Array;
use crate::arrays::bitmap::Bitmap;
use crate::arrays::compute::cmp::{compare_rows, sort_rows_by, SortColumn};
use crate::arrays::datatype::DataType;
use crate::grouping::GroupMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

/// `ROWS BETWEEN <start> AND <end>`, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub start: FrameBound,
    pub end: FrameBound,
}

impl Frame {
    pub fn validate(&self) -> Result<()> {
        if self.start == FrameBound::UnboundedFollowing
            || self.end == FrameBound::UnboundedPreceding
        {
            return Err(RegattaError::with_kind(
                ErrorKind::InvalidSchema,
                "Frame bounds out of order",
            ));
        }
        Ok(())
    }

    /// Frame row range for position `i` in a partition of `n` rows, or None
    /// when the frame is empty there.
    fn resolve(&self, i: usize, n: usize) -> Option<(usize, usize)> {
        let raw_start = match self.start {
            FrameBound::UnboundedPreceding => 0,
            FrameBound::Preceding(k) => i as i64 - k as i64,
            FrameBound::CurrentRow => i as i64,
            FrameBound::Following(k) => i as i64 + k as i64,
            FrameBound::UnboundedFollowing => return None,
        };
        let raw_end = match self.end {
            FrameBound::UnboundedPreceding => return None,
            FrameBound::Preceding(k) => i as i64 - k as i64,
            FrameBound::CurrentRow => i as i64,
            FrameBound::Following(k) => i as i64 + k as i64,
            FrameBound::UnboundedFollowing => n as i64 - 1,
        };

        let start = raw_start.max(0);
        let end = raw_end.min(n as i64 - 1);
        if start > end || end < 0 || start >= n as i64 {
            return None;
        }
        Some((start as usize, end as usize))
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame {
            start: FrameBound::UnboundedPreceding,
            end: FrameBound::CurrentRow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunction {
    RowNumber,
    Rank,
    DenseRank,
    PercentRank,
    CumeDist,
    Lead { offset: u64 },
    Lag { offset: u64 },
    /// 1-based position within the frame.
    NthValue { n: u64 },
    Ntile { buckets: u64 },
    FirstValue,
    LastValue,
}

impl WindowFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RowNumber => "row_number",
            Self::Rank => "rank",
            Self::DenseRank => "dense_rank",
            Self::PercentRank => "percent_rank",
            Self::CumeDist => "cume_dist",
            Self::Lead { .. } => "lead",
            Self::Lag { .. } => "lag",
            Self::NthValue { .. } => "nth_value",
            Self::Ntile { .. } => "ntile",
            Self::FirstValue => "first_value",
            Self::LastValue => "last_value",
        }
    }

    /// Whether the function reads a value column (as opposed to producing a
    /// number from row positions alone).
    pub fn needs_input(&self) -> bool {
        matches!(
            self,
            Self::Lead { .. }
                | Self::Lag { .. }
                | Self::NthValue { .. }
                | Self::FirstValue
                | Self::LastValue
        )
    }
}

/// Evaluate a window function. Output is aligned to input rows; rows dropped
/// from grouping get NULL.
pub fn compute_window(
    func: WindowFunction,
    input: Option<&Array>,
    order_cols: &[SortColumn],
    frame: Frame,
    map: &GroupMap,
    num_rows: usize,
) -> Result<Array> {
    frame.validate()?;

    let mut partitions = map.row_lists();
    for rows in &mut partitions {
        sort_rows_by(rows, order_cols)?;
    }

    match func {
        WindowFunction::RowNumber
        | WindowFunction::Rank
        | WindowFunction::DenseRank
        | WindowFunction::Ntile { .. } => {
            rank_family_i64(func, &partitions, order_cols, num_rows)
        }
        WindowFunction::PercentRank | WindowFunction::CumeDist => {
            rank_family_f64(func, &partitions, order_cols, num_rows)
        }
        _ => {
            let input = input.ok_or_else(|| {
                RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Window function requires an input column",
                )
                .with_field("function", func.name())
            })?;
            value_family(func, input, frame, &partitions)
        }
    }
}

/// Peer runs within a sorted partition: rows equal on every order column.
/// Returns the run index of each position and the (start, end) of each run.
fn peer_runs(
    rows: &[usize],
    order_cols: &[SortColumn],
) -> Result<(Vec<usize>, Vec<(usize, usize)>)> {
    let mut run_of = Vec::with_capacity(rows.len());
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for i in 0..rows.len() {
        let new_run =
            i == 0 || compare_rows(order_cols, rows[i], rows[i - 1])? != Ordering::Equal;
        if new_run {
            runs.push((i, i));
        } else if let Some(last) = runs.last_mut() {
            last.1 = i;
        }
        run_of.push(runs.len() - 1);
    }
    Ok((run_of, runs))
}

fn rank_family_i64(
    func: WindowFunction,
    partitions: &[Vec<usize>],
    order_cols: &[SortColumn],
    num_rows: usize,
) -> Result<Array> {
    let mut out = vec![0_i64; num_rows];
    let mut validity = Bitmap::new_with_all_false(num_rows);

    for rows in partitions {
        let n = rows.len();
        let (run_of, runs) = peer_runs(rows, order_cols)?;
        for (i, &row) in rows.iter().enumerate() {
            let value = match func {
                WindowFunction::RowNumber => i as i64 + 1,
                WindowFunction::Rank => runs[run_of[i]].0 as i64 + 1,
                WindowFunction::DenseRank => run_of[i] as i64 + 1,
                WindowFunction::Ntile { buckets } => ntile_bucket(i, n, buckets)? as i64,
                _ => unreachable!("non-integer rank function"),
            };
            out[row] = value;
            validity.set_unchecked(row, true);
        }
    }
    Array::from_primitive_values(DataType::Int64, out, validity)
}

fn rank_family_f64(
    func: WindowFunction,
    partitions: &[Vec<usize>],
    order_cols: &[SortColumn],
    num_rows: usize,
) -> Result<Array> {
    let mut out = vec![0.0_f64; num_rows];
    let mut validity = Bitmap::new_with_all_false(num_rows);

    for rows in partitions {
        let n = rows.len();
        let (run_of, runs) = peer_runs(rows, order_cols)?;
        for (i, &row) in rows.iter().enumerate() {
            let value = match func {
                WindowFunction::PercentRank => {
                    if n <= 1 {
                        0.0
                    } else {
                        runs[run_of[i]].0 as f64 / (n - 1) as f64
                    }
                }
                WindowFunction::CumeDist => (runs[run_of[i]].1 + 1) as f64 / n as f64,
                _ => unreachable!("non-float rank function"),
            };
            out[row] = value;
            validity.set_unchecked(row, true);
        }
    }
    Array::from_primitive_values(DataType::Float64, out, validity)
}

/// SQL NTILE: earlier buckets take the remainder rows.
fn ntile_bucket(i: usize, n: usize, buckets: u64) -> Result<u64> {
    if buckets == 0 {
        return Err(RegattaError::with_kind(
            ErrorKind::InvalidSchema,
            "NTILE bucket count must be positive",
        ));
    }
    let buckets = buckets as usize;
    let base = n / buckets;
    let rem = n % buckets;
    let big = rem * (base + 1);
    let bucket = if i < big {
        i / (base + 1)
    } else if base > 0 {
        rem + (i - big) / base
    } else {
        i
    };
    Ok(bucket as u64 + 1)
}

fn value_family(
    func: WindowFunction,
    input: &Array,
    frame: Frame,
    partitions: &[Vec<usize>],
) -> Result<Array> {
    let mut chosen: Vec<Option<usize>> = vec![None; input.len()];

    for rows in partitions {
        let n = rows.len();
        for (i, &row) in rows.iter().enumerate() {
            let src = match func {
                WindowFunction::Lead { offset } => i.checked_add(offset as usize).filter(|&s| s < n),
                WindowFunction::Lag { offset } => i.checked_sub(offset as usize),
                WindowFunction::FirstValue => frame.resolve(i, n).map(|(start, _)| start),
                WindowFunction::LastValue => frame.resolve(i, n).map(|(_, end)| end),
                WindowFunction::NthValue { n: nth } => frame.resolve(i, n).and_then(
                    |(start, end)| {
                        if nth == 0 {
                            return None;
                        }
                        let idx = start + (nth as usize - 1);
                        (idx <= end).then_some(idx)
                    },
                ),
                _ => unreachable!("rank family handled separately"),
            };
            chosen[row] = src.map(|s| rows[s]);
        }
    }

    gather_optional(input, &chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::scalar::ScalarValue;

    fn map_for(keys: &Array) -> GroupMap {
        GroupMap::build(&[keys], keys.len(), true).unwrap()
    }

    #[test]
    fn row_number_partitioned_and_ordered() {
        let keys = Array::from_iter([1_i64, 1, 2]);
        let order = Array::from_iter([5_i64, 1, 9]);
        let map = map_for(&keys);
        let out = compute_window(
            WindowFunction::RowNumber,
            None,
            &[SortColumn::asc(&order)],
            Frame::default(),
            &map,
            3,
        )
        .unwrap();
        // (A=1,C=5) -> 2, (A=1,C=1) -> 1, (A=2,C=9) -> 1.
        assert_eq!(
            vec![2_i64, 1, 1],
            out.primitive_slice::<i64>().unwrap().to_vec()
        );
    }

    #[test]
    fn rank_and_dense_rank_with_ties() {
        let keys = Array::from_iter([1_i64; 4]);
        let order = Array::from_iter([10_i64, 10, 20, 30]);
        let map = map_for(&keys);
        let cols = [SortColumn::asc(&order)];

        let rank = compute_window(WindowFunction::Rank, None, &cols, Frame::default(), &map, 4)
            .unwrap();
        assert_eq!(
            vec![1_i64, 1, 3, 4],
            rank.primitive_slice::<i64>().unwrap().to_vec()
        );

        let dense =
            compute_window(WindowFunction::DenseRank, None, &cols, Frame::default(), &map, 4)
                .unwrap();
        assert_eq!(
            vec![1_i64, 1, 2, 3],
            dense.primitive_slice::<i64>().unwrap().to_vec()
        );
    }

    #[test]
    fn percent_rank_and_cume_dist() {
        let keys = Array::from_iter([1_i64; 3]);
        let order = Array::from_iter([1_i64, 2, 2]);
        let map = map_for(&keys);
        let cols = [SortColumn::asc(&order)];

        let pr = compute_window(
            WindowFunction::PercentRank,
            None,
            &cols,
            Frame::default(),
            &map,
            3,
        )
        .unwrap();
        assert_eq!(
            vec![0.0, 0.5, 0.5],
            pr.primitive_slice::<f64>().unwrap().to_vec()
        );

        let cd = compute_window(
            WindowFunction::CumeDist,
            None,
            &cols,
            Frame::default(),
            &map,
            3,
        )
        .unwrap();
        let cds = cd.primitive_slice::<f64>().unwrap();
        assert!((cds[0] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(1.0, cds[1]);
        assert_eq!(1.0, cds[2]);
    }

    #[test]
    fn lead_and_lag() {
        let keys = Array::from_iter([1_i64, 1, 1]);
        let order = Array::from_iter([1_i64, 2, 3]);
        let vals = Array::from_iter(["a", "b", "c"]);
        let map = map_for(&keys);
        let cols = [SortColumn::asc(&order)];

        let lead = compute_window(
            WindowFunction::Lead { offset: 1 },
            Some(&vals),
            &cols,
            Frame::default(),
            &map,
            3,
        )
        .unwrap();
        assert_eq!(ScalarValue::from("b"), lead.value(0).unwrap());
        assert_eq!(ScalarValue::Null, lead.value(2).unwrap());

        let lag = compute_window(
            WindowFunction::Lag { offset: 1 },
            Some(&vals),
            &cols,
            Frame::default(),
            &map,
            3,
        )
        .unwrap();
        assert_eq!(ScalarValue::Null, lag.value(0).unwrap());
        assert_eq!(ScalarValue::from("b"), lag.value(2).unwrap());
    }

    #[test]
    fn last_value_with_bounded_frame() {
        let keys = Array::from_iter([1_i64; 3]);
        let order = Array::from_iter([1_i64, 2, 3]);
        let vals = Array::from_iter([10_i64, 20, 30]);
        let map = map_for(&keys);
        let cols = [SortColumn::asc(&order)];

        // ROWS BETWEEN CURRENT ROW AND 1 FOLLOWING.
        let frame = Frame {
            start: FrameBound::CurrentRow,
            end: FrameBound::Following(1),
        };
        let out = compute_window(
            WindowFunction::LastValue,
            Some(&vals),
            &cols,
            frame,
            &map,
            3,
        )
        .unwrap();
        assert_eq!(
            vec![20_i64, 30, 30],
            out.primitive_slice::<i64>().unwrap().to_vec()
        );
    }

    #[test]
    fn nth_value_outside_frame_is_null() {
        let keys = Array::from_iter([1_i64, 1]);
        let order = Array::from_iter([1_i64, 2]);
        let vals = Array::from_iter([7_i64, 8]);
        let map = map_for(&keys);
        let out = compute_window(
            WindowFunction::NthValue { n: 3 },
            Some(&vals),
            &[SortColumn::asc(&order)],
            Frame {
                start: FrameBound::UnboundedPreceding,
                end: FrameBound::UnboundedFollowing,
            },
            &map,
            2,
        )
        .unwrap();
        assert_eq!(ScalarValue::Null, out.value(0).unwrap());
    }

    #[test]
    fn ntile_spreads_remainder_first() {
        let keys = Array::from_iter([1_i64; 5]);
        let order = Array::from_iter([1_i64, 2, 3, 4, 5]);
        let map = map_for(&keys);
        let out = compute_window(
            WindowFunction::Ntile { buckets: 2 },
            None,
            &[SortColumn::asc(&order)],
            Frame::default(),
            &map,
            5,
        )
        .unwrap();
        assert_eq!(
            vec![1_i64, 1, 1, 2, 2],
            out.primitive_slice::<i64>().unwrap().to_vec()
        );
    }
}
