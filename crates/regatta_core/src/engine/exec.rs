//! Distributed GROUP BY execution.
//!
//! Every rank calls [`execute_group_by`] with its local partition and an
//! identical spec. Reduction aggregates shuffle rows to the rank owning each
//! key, group locally, and emit one result row per owned group. Row-shaped
//! aggregates additionally reverse-shuffle so every value lands back on the
//! rank and position its input row came from.
//!
//! Any fallible local step sitting between two collectives is synchronized
//! with [`check_collective`], so a data-dependent error (overflow, bad cast)
//! on one rank surfaces on every rank instead of deadlocking the healthy
//! ones.

use bytes::{Buf, BufMut};
use hashbrown::HashMap;
use regatta_error::{ErrorKind, RegattaError, Result};
use tracing::debug;

use super::assemble::assemble_reduction;
use super::spec::{AggFunction, GroupBySpec, SortKey};
use crate::aggs::basic::{compute_basic, BasicOp};
use crate::aggs::cumulative::{
    add_bases_f64, add_bases_i64, broadcast_to_rows, compute_cumulative, compute_shift, CumOp,
};
use crate::aggs::gather_optional;
use crate::aggs::idx::compute_idx;
use crate::aggs::listagg::compute_listagg;
use crate::aggs::nunique::{choose_strategy, count_distinct, distinct_rows, NUniqueStrategy};
use crate::aggs::quantile::{compute_median, compute_quantile};
use crate::aggs::varstd::compute_var;
use crate::aggs::window::compute_window;
use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::compute::cmp::SortColumn;
use crate::arrays::compute::concat::concat;
use crate::arrays::compute::hash::hash_arrays;
use crate::arrays::compute::take::{take, take_batch};
use crate::arrays::datatype::DataType;
use crate::arrays::ipc::{decode_batch, encode_batch};
use crate::arrays::schema::{Schema, Table};
use crate::cluster::{check_collective, Communicator};
use crate::grouping::GroupMap;
use crate::shuffle::{reverse_shuffle, route_by_hash, shuffle_batch, with_origin_columns};

/// Run one grouped aggregation collectively. Every rank passes its local
/// partition of the same logical table and the same spec; every rank gets
/// back its slice of the result.
pub fn execute_group_by(
    comm: &dyn Communicator,
    table: &Table,
    spec: &GroupBySpec,
) -> Result<Table> {
    // Specs are identical on all ranks, so validation failures raise
    // everywhere at once with no communication.
    spec.validate(&table.schema)?;

    debug!(
        rank = comm.rank(),
        rows = table.num_rows(),
        aggregates = spec.aggregates.len(),
        row_shaped = spec.is_row_shaped(),
        "executing group by"
    );

    if spec.is_row_shaped() {
        execute_row_shaped(comm, table, spec)
    } else {
        execute_reduction(comm, table, spec)
    }
}

fn column<'a>(schema: &Schema, batch: &'a Batch, name: &str) -> Result<&'a Array> {
    let idx = schema.resolve(name)?;
    batch
        .column(idx)
        .ok_or_else(|| RegattaError::new("Batch missing resolved column").with_field("column", name))
}

fn required<'a>(input: Option<&'a Array>, function: &AggFunction) -> Result<&'a Array> {
    input.ok_or_else(|| {
        RegattaError::with_kind(
            ErrorKind::InvalidSchema,
            "Aggregate requires an input column",
        )
        .with_field("function", function.name())
    })
}

fn sort_columns<'a>(
    schema: &Schema,
    batch: &'a Batch,
    keys: &[SortKey],
) -> Result<Vec<SortColumn<'a>>> {
    keys.iter()
        .map(|key| {
            let array = column(schema, batch, &key.column)?;
            Ok(SortColumn {
                array,
                desc: key.desc,
                nulls_first: key.nulls_first,
            })
        })
        .collect()
}

/// Global row labels for this rank: a contiguous range starting at the sum of
/// all lower ranks' row counts.
fn global_labels(comm: &dyn Communicator, num_rows: usize) -> Result<Array> {
    let mut buf = Vec::with_capacity(8);
    buf.put_u64_le(num_rows as u64);
    let gathered = comm.all_gather(buf)?;

    let mut offset = 0_u64;
    for (rank, peer) in gathered.iter().enumerate() {
        if rank == comm.rank() {
            break;
        }
        let mut peer = peer.as_slice();
        if peer.remaining() < 8 {
            return Err(RegattaError::with_kind(
                ErrorKind::Internal,
                "Malformed row count buffer from peer",
            )
            .with_field("origin_rank", rank));
        }
        offset += peer.get_u64_le();
    }
    Ok(Array::from_iter(offset..offset + num_rows as u64))
}

/// Match each target group to the source group holding the same key, if any.
/// Both sides pass one representative row per group.
fn align_groups(target: &[Array], source: &[Array]) -> Result<Vec<Option<usize>>> {
    debug_assert_eq!(target.len(), source.len());
    let n_target = target.first().map_or(0, |c| c.len());
    let n_source = source.first().map_or(0, |c| c.len());

    let combined: Vec<Array> = target
        .iter()
        .zip(source)
        .map(|(t, s)| concat(&[t, s]))
        .collect::<Result<_>>()?;
    let refs: Vec<&Array> = combined.iter().collect();
    // NULL keys survived grouping on both sides, so they must match here too.
    let map = GroupMap::build(&refs, n_target + n_source, false)?;
    let gids = map.group_ids();

    let mut by_gid: HashMap<u32, usize> = HashMap::with_capacity(n_source);
    for i in 0..n_source {
        by_gid.entry(gids[n_target + i]).or_insert(i);
    }
    Ok((0..n_target).map(|i| by_gid.get(&gids[i]).copied()).collect())
}

fn execute_reduction(comm: &dyn Communicator, table: &Table, spec: &GroupBySpec) -> Result<Table> {
    let schema = &table.schema;
    let num_rows = table.num_rows();
    let route_width = spec.key_shuffle_prefix.unwrap_or(spec.keys.len());

    let local_key_cols: Vec<&Array> = spec
        .keys
        .iter()
        .map(|k| column(schema, &table.batch, k))
        .collect::<Result<_>>()?;

    // NUnique strategy decisions need pre-shuffle statistics and a collective
    // agreement; collect them before anything else moves.
    let mut strategies: Vec<Option<NUniqueStrategy>> = Vec::with_capacity(spec.aggregates.len());
    for agg in &spec.aggregates {
        if let AggFunction::NUnique { .. } = agg.function {
            let value = column(schema, &table.batch, required_name(agg)?)?;
            strategies.push(Some(nunique_strategy(comm, &local_key_cols, value)?));
        } else {
            strategies.push(None);
        }
    }

    let needs_labels = spec.aggregates.iter().any(|a| {
        matches!(a.function, AggFunction::IdxMin | AggFunction::IdxMax)
    });
    let label_idx = table.batch.num_columns();
    let mut batch = table.batch.clone();
    if needs_labels {
        batch.try_push_column(global_labels(comm, num_rows)?)?;
    }

    let hashes = hash_arrays(&local_key_cols[..route_width], num_rows)?;
    let destinations = route_by_hash(&hashes, comm.size());
    let shuffled = shuffle_batch(comm, &batch, &destinations)?;

    let key_cols: Vec<&Array> = spec
        .keys
        .iter()
        .map(|k| column(schema, &shuffled, k))
        .collect::<Result<_>>()?;
    let map = GroupMap::build(&key_cols, shuffled.num_rows(), spec.dropna)?;

    let mut agg_cols = Vec::with_capacity(spec.aggregates.len());
    for (agg, strategy) in spec.aggregates.iter().zip(&strategies) {
        let input = match &agg.input {
            Some(name) => Some(column(schema, &shuffled, name)?),
            None => None,
        };

        let col = match &agg.function {
            AggFunction::Basic(op) => check_collective(comm, compute_basic(*op, input, &map))?,
            AggFunction::Var { ddof } => check_collective(
                comm,
                compute_var(required(input, &agg.function)?, &map, *ddof, false),
            )?,
            AggFunction::Std { ddof } => check_collective(
                comm,
                compute_var(required(input, &agg.function)?, &map, *ddof, true),
            )?,
            AggFunction::Median => {
                check_collective(comm, compute_median(required(input, &agg.function)?, &map))?
            }
            AggFunction::Quantile { q } => check_collective(
                comm,
                compute_quantile(required(input, &agg.function)?, &map, *q),
            )?,
            AggFunction::NUnique { dropna } => {
                match strategy.unwrap_or(NUniqueStrategy::ShuffleKeys) {
                    NUniqueStrategy::ShuffleKeys => check_collective(
                        comm,
                        count_distinct(required(input, &agg.function)?, &map, *dropna),
                    )?,
                    other => {
                        let value = column(schema, &table.batch, required_name(agg)?)?;
                        let main_reps: Vec<Array> = key_cols
                            .iter()
                            .map(|c| take(c, map.representatives()))
                            .collect::<Result<_>>()?;
                        nunique_remote(
                            comm,
                            other,
                            &local_key_cols,
                            value,
                            route_width,
                            spec.dropna,
                            *dropna,
                            &main_reps,
                        )?
                    }
                }
            }
            AggFunction::IdxMin | AggFunction::IdxMax => {
                let labels = shuffled
                    .column(label_idx)
                    .ok_or_else(|| RegattaError::new("Missing row label column"))?;
                let want_min = matches!(agg.function, AggFunction::IdxMin);
                check_collective(
                    comm,
                    compute_idx(required(input, &agg.function)?, labels, &map, want_min),
                )?
            }
            AggFunction::ListAgg {
                separator,
                order_by,
            } => {
                let order_cols = sort_columns(schema, &shuffled, order_by)?;
                check_collective(
                    comm,
                    compute_listagg(
                        required(input, &agg.function)?,
                        &order_cols,
                        &map,
                        separator,
                    ),
                )?
            }
            other => {
                return Err(RegattaError::with_kind(
                    ErrorKind::Internal,
                    "Row-shaped aggregate reached the reduction path",
                )
                .with_field("function", other.name()))
            }
        };
        agg_cols.push(col);
    }

    assemble_reduction(schema, spec, &key_cols, &map, agg_cols)
}

fn required_name(agg: &super::spec::AggregateSpec) -> Result<&str> {
    agg.input.as_deref().ok_or_else(|| {
        RegattaError::with_kind(
            ErrorKind::InvalidSchema,
            "Aggregate requires an input column",
        )
        .with_field("function", agg.function.name())
    })
}

/// Agree on a distinct-count strategy from global statistics. Every rank
/// contributes (rows, distinct local pairs) so all ranks decide identically.
fn nunique_strategy(
    comm: &dyn Communicator,
    key_cols: &[&Array],
    value: &Array,
) -> Result<NUniqueStrategy> {
    let stats: Result<(u64, u64)> = (|| {
        let mut cols = key_cols.to_vec();
        cols.push(value);
        let pairs = distinct_rows(&cols, value.len())?.len();
        Ok((value.len() as u64, pairs as u64))
    })();
    let (rows, pairs) = check_collective(comm, stats)?;

    let mut buf = Vec::with_capacity(16);
    buf.put_u64_le(rows);
    buf.put_u64_le(pairs);
    let gathered = comm.all_gather(buf)?;

    let mut total_rows = 0_u64;
    let mut total_pairs = 0_u64;
    for (rank, peer) in gathered.iter().enumerate() {
        let mut peer = peer.as_slice();
        if peer.remaining() < 16 {
            return Err(RegattaError::with_kind(
                ErrorKind::Internal,
                "Malformed statistics buffer from peer",
            )
            .with_field("origin_rank", rank));
        }
        total_rows += peer.get_u64_le();
        total_pairs += peer.get_u64_le();
    }

    let duplication = if total_pairs == 0 {
        1.0
    } else {
        total_rows as f64 / total_pairs as f64
    };
    Ok(choose_strategy(
        total_pairs as usize,
        duplication,
        comm.size(),
    ))
}

/// Distinct counting through a dedicated exchange, for the strategies that do
/// not ride the main shuffle. Returns one count per main-path group.
#[allow(clippy::too_many_arguments)]
fn nunique_remote(
    comm: &dyn Communicator,
    strategy: NUniqueStrategy,
    local_keys: &[&Array],
    value: &Array,
    route_width: usize,
    key_dropna: bool,
    value_dropna: bool,
    main_reps: &[Array],
) -> Result<Array> {
    let nkeys = local_keys.len();

    let prep: Result<(Batch, Vec<usize>)> = (|| {
        let mut cols: Vec<&Array> = local_keys.to_vec();
        cols.push(value);

        match strategy {
            NUniqueStrategy::LocalPreDedup => {
                // Shrink before shuffling: one row per local (key, value)
                // pair, routed by key.
                let rows = distinct_rows(&cols, value.len())?;
                let deduped: Vec<Array> =
                    cols.iter().map(|c| take(c, &rows)).collect::<Result<_>>()?;
                let route: Vec<&Array> = deduped[..route_width].iter().collect();
                let hashes = hash_arrays(&route, rows.len())?;
                let dests = route_by_hash(&hashes, comm.size());
                Ok((Batch::try_new(deduped)?, dests))
            }
            _ => {
                // Route by (key, value) so duplicates of a pair colocate.
                let hashes = hash_arrays(&cols, value.len())?;
                let dests = route_by_hash(&hashes, comm.size());
                Ok((Batch::try_new(cols.iter().map(|&c| c.clone()))?, dests))
            }
        }
    })();
    let (batch, dests) = check_collective(comm, prep)?;
    let mut shuffled = shuffle_batch(comm, &batch, &dests)?;

    if strategy == NUniqueStrategy::ShuffleKeysValues {
        // Duplicates of each pair are now on one rank. Keep a single
        // representative and send it to the rank owning the key.
        let prep2: Result<(Batch, Vec<usize>)> = (|| {
            let cols: Vec<&Array> = shuffled.columns().iter().collect();
            let rows = distinct_rows(&cols, shuffled.num_rows())?;
            let deduped = take_batch(&shuffled, &rows)?;
            let route: Vec<&Array> = deduped.columns()[..route_width].iter().collect();
            let hashes = hash_arrays(&route, deduped.num_rows())?;
            let dests = route_by_hash(&hashes, comm.size());
            Ok((deduped, dests))
        })();
        let (deduped, dests) = check_collective(comm, prep2)?;
        shuffled = shuffle_batch(comm, &deduped, &dests)?;
    }

    let counted: Result<Array> = (|| {
        let side_keys: Vec<&Array> = shuffled.columns()[..nkeys].iter().collect();
        let side_value = shuffled
            .column(nkeys)
            .ok_or_else(|| RegattaError::new("Missing value column in distinct exchange"))?;
        let side_map = GroupMap::build(&side_keys, shuffled.num_rows(), key_dropna)?;
        let counts = count_distinct(side_value, &side_map, value_dropna)?;

        let side_reps: Vec<Array> = side_keys
            .iter()
            .map(|c| take(c, side_map.representatives()))
            .collect::<Result<_>>()?;
        let mapping = align_groups(main_reps, &side_reps)?;
        gather_optional(&counts, &mapping)
    })();
    check_collective(comm, counted)
}

fn execute_row_shaped(comm: &dyn Communicator, table: &Table, spec: &GroupBySpec) -> Result<Table> {
    if chain_scan_eligible(table, spec) {
        execute_chain_scan(comm, table, spec)
    } else {
        execute_row_shaped_shuffled(comm, table, spec)
    }
}

/// Whether the cheaper running-total propagation applies: every aggregate is
/// a NULL-skipping cumulative sum over Int64 or Float64. Poisoning NULLs
/// cannot ride this path since poison state would have to cross ranks.
fn chain_scan_eligible(table: &Table, spec: &GroupBySpec) -> bool {
    spec.aggregates.iter().all(|agg| {
        if !matches!(agg.function, AggFunction::Cumulative(CumOp::Sum)) || !agg.skipna {
            return false;
        }
        let Some(name) = agg.input.as_deref() else {
            return false;
        };
        match table.schema.resolve(name) {
            Ok(idx) => table.schema.field(idx).is_some_and(|f| {
                matches!(f.datatype, DataType::Int64 | DataType::Float64)
            }),
            Err(_) => false,
        }
    })
}

/// Running-total propagation: no row ever moves. Each rank computes local
/// per-group prefix sums, then adds the total contributed by every lower
/// rank's share of the same group. Result-equivalent to the reverse-shuffle
/// path because global row order is rank-major.
fn execute_chain_scan(comm: &dyn Communicator, table: &Table, spec: &GroupBySpec) -> Result<Table> {
    let schema = &table.schema;
    let num_rows = table.num_rows();
    let nkeys = spec.keys.len();

    let key_cols: Vec<&Array> = spec
        .keys
        .iter()
        .map(|k| column(schema, &table.batch, k))
        .collect::<Result<_>>()?;
    let map = GroupMap::build(&key_cols, num_rows, spec.dropna)?;

    let local: Result<(Vec<Array>, Vec<u8>)> = (|| {
        let mut outs = Vec::with_capacity(spec.aggregates.len());
        let mut exchange_cols: Vec<Array> = key_cols
            .iter()
            .map(|c| take(c, map.representatives()))
            .collect::<Result<_>>()?;

        for agg in &spec.aggregates {
            let input = column(schema, &table.batch, required_name(agg)?)?;
            outs.push(compute_cumulative(input, &map, CumOp::Sum, true)?);
            exchange_cols.push(compute_basic(BasicOp::Sum, Some(input), &map)?);
        }

        let mut buf = Vec::new();
        encode_batch(&Batch::try_new(exchange_cols)?, &mut buf)?;
        Ok((outs, buf))
    })();
    let (outs, buf) = check_collective(comm, local)?;
    let gathered = comm.all_gather(buf)?;

    let adjusted: Result<Vec<Array>> = (|| {
        let local_reps: Vec<Array> = key_cols
            .iter()
            .map(|c| take(c, map.representatives()))
            .collect::<Result<_>>()?;

        let mut int_bases = vec![vec![0_i128; map.num_groups()]; spec.aggregates.len()];
        let mut float_bases = vec![vec![0.0_f64; map.num_groups()]; spec.aggregates.len()];

        for (rank, peer_buf) in gathered.iter().enumerate().take(comm.rank()) {
            let peer = decode_batch(&mut peer_buf.as_slice())?;
            let peer_keys: Vec<Array> = (0..nkeys)
                .map(|i| {
                    peer.column(i).cloned().ok_or_else(|| {
                        RegattaError::new("Missing key column in running-total exchange")
                            .with_field("origin_rank", rank)
                    })
                })
                .collect::<Result<_>>()?;
            let mapping = align_groups(&local_reps, &peer_keys)?;

            for (a, _) in spec.aggregates.iter().enumerate() {
                let totals = peer.column(nkeys + a).ok_or_else(|| {
                    RegattaError::new("Missing totals column in running-total exchange")
                        .with_field("origin_rank", rank)
                })?;
                for (gid, src) in mapping.iter().enumerate() {
                    let Some(src) = src else { continue };
                    if !totals.is_valid(*src) {
                        continue;
                    }
                    match totals.datatype() {
                        DataType::Int64 => {
                            let v = totals.primitive_slice::<i64>()?[*src] as i128;
                            int_bases[a][gid] =
                                int_bases[a][gid].checked_add(v).ok_or_else(|| {
                                    RegattaError::with_kind(
                                        ErrorKind::Overflow,
                                        "Running-total base overflow",
                                    )
                                })?;
                        }
                        DataType::Float64 => {
                            float_bases[a][gid] += totals.primitive_slice::<f64>()?[*src];
                        }
                        other => {
                            return Err(RegattaError::with_kind(
                                ErrorKind::Internal,
                                "Unexpected totals type in running-total exchange",
                            )
                            .with_field("datatype", other))
                        }
                    }
                }
            }
        }

        outs.iter()
            .enumerate()
            .map(|(a, out)| match out.datatype() {
                DataType::Float64 => add_bases_f64(out, &map, &float_bases[a]),
                _ => add_bases_i64(out, &map, &int_bases[a]),
            })
            .collect()
    })();
    let cols = check_collective(comm, adjusted)?;

    Table::try_new(
        Schema::new(spec.output_fields(schema)?),
        Batch::try_new(cols)?,
    )
}

/// General row-shaped path: tag rows with their origin, shuffle by key,
/// compute, and reverse-shuffle the outputs home.
fn execute_row_shaped_shuffled(
    comm: &dyn Communicator,
    table: &Table,
    spec: &GroupBySpec,
) -> Result<Table> {
    let schema = &table.schema;
    let route_width = spec.key_shuffle_prefix.unwrap_or(spec.keys.len());

    let tagged = with_origin_columns(&table.batch, comm.rank())?;
    let route_cols: Vec<&Array> = spec.keys[..route_width]
        .iter()
        .map(|k| column(schema, &tagged, k))
        .collect::<Result<_>>()?;
    let hashes = hash_arrays(&route_cols, tagged.num_rows())?;
    let destinations = route_by_hash(&hashes, comm.size());
    let shuffled = shuffle_batch(comm, &tagged, &destinations)?;

    let computed: Result<Batch> = (|| {
        let key_cols: Vec<&Array> = spec
            .keys
            .iter()
            .map(|k| column(schema, &shuffled, k))
            .collect::<Result<_>>()?;
        let map = GroupMap::build(&key_cols, shuffled.num_rows(), spec.dropna)?;

        let mut cols = Vec::with_capacity(spec.aggregates.len() + 2);
        for agg in &spec.aggregates {
            let input = match &agg.input {
                Some(name) => Some(column(schema, &shuffled, name)?),
                None => None,
            };

            let col = match &agg.function {
                AggFunction::Cumulative(op) => compute_cumulative(
                    required(input, &agg.function)?,
                    &map,
                    *op,
                    agg.skipna,
                )?,
                AggFunction::Shift { offset } => {
                    compute_shift(required(input, &agg.function)?, &map, *offset)?
                }
                AggFunction::Transform(op) => {
                    let reduced = compute_basic(*op, input, &map)?;
                    broadcast_to_rows(&reduced, &map)?
                }
                AggFunction::Window {
                    function,
                    order_by,
                    frame,
                } => {
                    let order_cols = sort_columns(schema, &shuffled, order_by)?;
                    compute_window(
                        *function,
                        input,
                        &order_cols,
                        *frame,
                        &map,
                        shuffled.num_rows(),
                    )?
                }
                other => {
                    return Err(RegattaError::with_kind(
                        ErrorKind::Internal,
                        "Reduction aggregate reached the row-shaped path",
                    )
                    .with_field("function", other.name()))
                }
            };
            cols.push(col);
        }

        // Carry the origin columns so outputs can be sent home.
        let n = shuffled.num_columns();
        for idx in [n - 2, n - 1] {
            cols.push(
                shuffled
                    .column(idx)
                    .cloned()
                    .ok_or_else(|| RegattaError::new("Missing origin column"))?,
            );
        }
        Batch::try_new(cols)
    })();
    let result_batch = check_collective(comm, computed)?;
    let restored = reverse_shuffle(comm, &result_batch)?;

    Table::try_new(Schema::new(spec.output_fields(schema)?), restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::schema::Field;
    use crate::cluster::local::LocalCluster;
    use crate::engine::spec::AggregateSpec;

    fn table(keys: Vec<i64>, vals: Vec<i64>) -> Table {
        let schema = Schema::new([
            Field::new("k", DataType::Int64),
            Field::new("v", DataType::Int64),
        ]);
        let batch = Batch::try_new([Array::from_iter(keys), Array::from_iter(vals)]).unwrap();
        Table::try_new(schema, batch).unwrap()
    }

    #[test]
    fn single_rank_sum() {
        let results = LocalCluster::run(1, |comm| {
            let table = table(vec![1, 1, 2, 2], vec![10, 20, 30, 40]);
            let mut spec = GroupBySpec::new(
                ["k"],
                vec![AggregateSpec::new(
                    "total",
                    Some("v"),
                    AggFunction::Basic(BasicOp::Sum),
                )],
            );
            spec.sort = true;
            execute_group_by(comm, &table, &spec)
        });

        let out = results.into_iter().next().unwrap().unwrap();
        assert_eq!(
            vec![1_i64, 2],
            out.column_by_name("k")
                .unwrap()
                .primitive_slice::<i64>()
                .unwrap()
                .to_vec()
        );
        assert_eq!(
            vec![30_i64, 70],
            out.column_by_name("total")
                .unwrap()
                .primitive_slice::<i64>()
                .unwrap()
                .to_vec()
        );
    }

    #[test]
    fn invalid_spec_fails_without_communication() {
        let results = LocalCluster::run(1, |comm| {
            let table = table(vec![1], vec![1]);
            let spec = GroupBySpec::new(
                ["missing"],
                vec![AggregateSpec::new(
                    "total",
                    Some("v"),
                    AggFunction::Basic(BasicOp::Sum),
                )],
            );
            execute_group_by(comm, &table, &spec)
        });
        let err = results.into_iter().next().unwrap().unwrap_err();
        assert_eq!(ErrorKind::InvalidSchema, err.kind());
    }

    #[test]
    fn align_groups_matches_keys() {
        let target = vec![Array::from_iter([1_i64, 2, 3])];
        let source = vec![Array::from_iter([3_i64, 1])];
        let mapping = align_groups(&target, &source).unwrap();
        assert_eq!(vec![Some(1), None, Some(0)], mapping);
    }

    #[test]
    fn chain_scan_eligibility() {
        let t = table(vec![1], vec![1]);
        let mut spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "run",
                Some("v"),
                AggFunction::Cumulative(CumOp::Sum),
            )],
        );
        assert!(chain_scan_eligible(&t, &spec));

        spec.aggregates[0].skipna = false;
        assert!(!chain_scan_eligible(&t, &spec));

        spec.aggregates[0].skipna = true;
        spec.aggregates[0].function = AggFunction::Cumulative(CumOp::Prod);
        assert!(!chain_scan_eligible(&t, &spec));
    }
}
