//! Row redistribution across ranks.
//!
//! A shuffle routes every row to the rank owning its key hash
//! (`hash % size`), so all rows of a group land on one rank. Received
//! partitions are concatenated in source-rank order; combined with ordered
//! per-source delivery this keeps rows of a group in their original global
//! order, which the order-sensitive aggregates rely on.
//!
//! Row-shaped operations tag each row with its origin before shuffling and
//! use [`reverse_shuffle`] to put computed values back where the inputs came
//! from.

use regatta_error::{RegattaError, Result};
use tracing::debug;

use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::compute::concat::concat_batches;
use crate::arrays::compute::take::take_batch;
use crate::arrays::ipc::{decode_batch, encode_batch};
use crate::cluster::Communicator;

/// Map row hashes to destination ranks.
pub fn route_by_hash(hashes: &[u64], num_ranks: usize) -> Vec<usize> {
    hashes
        .iter()
        .map(|&h| (h % num_ranks as u64) as usize)
        .collect()
}

/// Exchange rows so that row `i` of `batch` ends up on `destinations[i]`.
///
/// Every rank must call this collectively. The returned batch holds the rows
/// received by this rank, grouped by source rank in ascending order with each
/// source's rows in their original order.
pub fn shuffle_batch(
    comm: &dyn Communicator,
    batch: &Batch,
    destinations: &[usize],
) -> Result<Batch> {
    if destinations.len() != batch.num_rows() {
        return Err(RegattaError::new("One destination per row required")
            .with_field("destinations", destinations.len())
            .with_field("rows", batch.num_rows()));
    }

    let size = comm.size();
    let mut per_dest: Vec<Vec<usize>> = vec![Vec::new(); size];
    for (row, &dst) in destinations.iter().enumerate() {
        let indices = per_dest.get_mut(dst).ok_or_else(|| {
            RegattaError::new("Destination rank out of bounds")
                .with_field("dst", dst)
                .with_field("size", size)
        })?;
        indices.push(row);
    }

    let mut outgoing = Vec::with_capacity(size);
    for indices in &per_dest {
        let part = take_batch(batch, indices)?;
        let mut buf = Vec::new();
        encode_batch(&part, &mut buf)?;
        outgoing.push(buf);
    }

    debug!(
        rank = comm.rank(),
        rows = batch.num_rows(),
        "exchanging shuffle partitions"
    );
    let incoming = comm.all_to_all(outgoing)?;

    let batches = incoming
        .iter()
        .map(|buf| decode_batch(&mut buf.as_slice()))
        .collect::<Result<Vec<_>>>()?;
    concat_batches(&batches)
}

/// Append origin-tracking columns (rank as UInt32, local row as UInt64) to a
/// batch about to be shuffled.
pub fn with_origin_columns(batch: &Batch, rank: usize) -> Result<Batch> {
    let num_rows = batch.num_rows();
    let mut out = batch.clone();
    out.try_push_column(Array::from_iter(
        std::iter::repeat(rank as u32).take(num_rows),
    ))?;
    out.try_push_column(Array::from_iter(0..num_rows as u64))?;
    Ok(out)
}

/// Send rows back to the ranks recorded by [`with_origin_columns`] and
/// restore their original local order. The origin columns are stripped from
/// the result.
pub fn reverse_shuffle(comm: &dyn Communicator, batch: &Batch) -> Result<Batch> {
    let num_cols = batch.num_columns();
    if num_cols < 2 {
        return Err(RegattaError::new("Batch is missing origin columns")
            .with_field("columns", num_cols));
    }
    let rank_col = num_cols - 2;
    let row_col = num_cols - 1;

    let ranks = batch
        .column(rank_col)
        .ok_or_else(|| RegattaError::new("Missing origin rank column"))?
        .primitive_slice::<u32>()?;
    let destinations: Vec<usize> = ranks.iter().map(|&r| r as usize).collect();

    let returned = shuffle_batch(comm, batch, &destinations)?;

    // Each original local row comes back exactly once; sorting by the origin
    // row index restores the input order.
    let rows = returned
        .column(row_col)
        .ok_or_else(|| RegattaError::new("Missing origin row column"))?
        .primitive_slice::<u64>()?;
    let mut order: Vec<usize> = (0..returned.num_rows()).collect();
    order.sort_unstable_by_key(|&i| rows[i]);

    let sorted = take_batch(&returned, &order)?;
    sorted.project(&(0..rank_col).collect::<Vec<_>>())
}
