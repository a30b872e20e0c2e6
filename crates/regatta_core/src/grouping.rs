//! Local hash grouping.
//!
//! After a shuffle every rank groups its rows independently. The map assigns
//! dense group ids in first-appearance order, probing on real key equality so
//! hash collisions cannot merge distinct keys.

use ahash::RandomState;
use hashbrown::HashMap;
use regatta_error::Result;
use tracing::trace;

use crate::arrays::array::Array;
use crate::arrays::compute::cmp::rows_eq;
use crate::arrays::compute::hash::{hash_arrays, HASH_RANDOM_STATE};

/// Group id assigned to rows excluded from grouping (a NULL in any key column
/// under dropna).
pub const DROPPED: u32 = u32::MAX;

#[derive(Debug)]
pub struct GroupMap {
    /// Per input row: its group id, or [`DROPPED`].
    group_ids: Vec<u32>,
    /// First input row of each group, indexed by group id.
    representatives: Vec<usize>,
}

impl GroupMap {
    /// Group rows by the given key columns.
    ///
    /// With `dropna` set, a row with NULL in any key column gets [`DROPPED`]
    /// and belongs to no group. Otherwise NULL participates as an ordinary
    /// key value (NULL matches NULL).
    pub fn build(keys: &[&Array], num_rows: usize, dropna: bool) -> Result<Self> {
        let hashes = hash_arrays(keys, num_rows)?;

        let mut group_ids = Vec::with_capacity(num_rows);
        let mut representatives: Vec<usize> = Vec::new();
        // Hash -> candidate group ids. Buckets are tiny outside of adversarial
        // collisions.
        let mut by_hash: HashMap<u64, Vec<u32>, RandomState> =
            HashMap::with_hasher(HASH_RANDOM_STATE);

        for row in 0..num_rows {
            if dropna && keys.iter().any(|k| !k.is_valid(row)) {
                group_ids.push(DROPPED);
                continue;
            }

            let bucket = by_hash.entry(hashes[row]).or_default();
            let mut found = None;
            for &gid in bucket.iter() {
                if rows_eq(keys, row, keys, representatives[gid as usize])? {
                    found = Some(gid);
                    break;
                }
            }

            let gid = match found {
                Some(gid) => gid,
                None => {
                    let gid = representatives.len() as u32;
                    representatives.push(row);
                    bucket.push(gid);
                    gid
                }
            };
            group_ids.push(gid);
        }

        trace!(
            rows = num_rows,
            groups = representatives.len(),
            "built group map"
        );

        Ok(GroupMap {
            group_ids,
            representatives,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.representatives.len()
    }

    /// Per-row group assignment. Rows dropped by dropna hold [`DROPPED`].
    pub fn group_ids(&self) -> &[u32] {
        &self.group_ids
    }

    /// First input row seen for a group; used to materialize key columns.
    pub fn representative(&self, group_id: u32) -> usize {
        self.representatives[group_id as usize]
    }

    pub fn representatives(&self) -> &[usize] {
        &self.representatives
    }

    /// Input rows of each group, in input order.
    pub fn row_lists(&self) -> Vec<Vec<usize>> {
        let mut lists: Vec<Vec<usize>> = vec![Vec::new(); self.num_groups()];
        for (row, &gid) in self.group_ids.iter().enumerate() {
            if gid != DROPPED {
                lists[gid as usize].push(row);
            }
        }
        lists
    }

    pub fn group_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_groups()];
        for &gid in &self.group_ids {
            if gid != DROPPED {
                sizes[gid as usize] += 1;
            }
        }
        sizes
    }
}
