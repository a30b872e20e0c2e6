//! Distinct-count aggregation.
//!
//! Counting distinct values per group is exact, but how rows move between
//! ranks is a strategy choice driven by data shape:
//!
//! - `ShuffleKeys`: shuffle rows by key, then count distinct values locally.
//!   The default; moves every row once.
//! - `ShuffleKeysValues`: shuffle by (key, value) hash so duplicates of a
//!   pair collapse wherever they land, then a second shuffle of distinct
//!   pairs by key. Wins when groups are small and would otherwise skew.
//! - `LocalPreDedup`: drop local duplicate (key, value) pairs before the key
//!   shuffle. Wins when local data is highly repetitive.
//!
//! All three produce identical results; only the traffic differs.

use regatta_error::Result;
use serde::{Deserialize, Serialize};

use crate::arrays::array::Array;
use crate::grouping::{GroupMap, DROPPED};

/// Above this estimated per-rank group count, pair-shuffling stops paying
/// off. Empirically tuned; correctness does not depend on the exact value.
pub const SMALL_GROUP_COUNT_THRESHOLD: usize = 4096;

/// Local rows per distinct (key, value) pair above which pre-dedup is worth
/// the extra hash pass.
pub const HIGH_DUPLICATION_RATIO: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NUniqueStrategy {
    ShuffleKeys,
    ShuffleKeysValues,
    LocalPreDedup,
}

/// Pick a strategy from local statistics. Pure so it can be tested without a
/// cluster.
pub fn choose_strategy(
    estimated_group_count: usize,
    duplication_ratio: f64,
    num_ranks: usize,
) -> NUniqueStrategy {
    if num_ranks <= 1 {
        // Nothing to shuffle; take the plain path.
        return NUniqueStrategy::ShuffleKeys;
    }
    if duplication_ratio >= HIGH_DUPLICATION_RATIO {
        return NUniqueStrategy::LocalPreDedup;
    }
    if estimated_group_count <= SMALL_GROUP_COUNT_THRESHOLD {
        return NUniqueStrategy::ShuffleKeysValues;
    }
    NUniqueStrategy::ShuffleKeys
}

/// Count distinct values per group over colocated rows.
///
/// With `dropna`, NULL values do not count; otherwise NULL counts as one
/// distinct value when present.
pub fn count_distinct(values: &Array, map: &GroupMap, dropna: bool) -> Result<Array> {
    // Distinct (group, value) pairs are exactly the groups of a secondary
    // grouping keyed by (group id, value).
    let gid_col = Array::from_iter(map.group_ids().iter().copied());
    let inner = GroupMap::build(&[&gid_col, values], values.len(), false)?;

    let mut counts = vec![0_i64; map.num_groups()];
    for &rep in inner.representatives() {
        let gid = map.group_ids()[rep];
        if gid == DROPPED {
            continue;
        }
        if dropna && !values.is_valid(rep) {
            continue;
        }
        counts[gid as usize] += 1;
    }
    Ok(Array::from_iter(counts))
}

/// Row indices of the first occurrence of each distinct tuple over `cols`.
/// NULL is kept as a distinguishable value; callers apply their own NULL
/// policy when counting.
pub fn distinct_rows(cols: &[&Array], num_rows: usize) -> Result<Vec<usize>> {
    Ok(GroupMap::build(cols, num_rows, false)?
        .representatives()
        .to_vec())
}
