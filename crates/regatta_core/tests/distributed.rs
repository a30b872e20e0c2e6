//! Multi-rank aggregation tests on the in-process cluster.
//!
//! Each test runs the same spec on every rank with a different slice of one
//! logical table, then checks the combined result against a single source of
//! truth (usually the single-rank run or a hand-computed answer).

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regatta_core::aggs::basic::BasicOp;
use regatta_core::aggs::cumulative::CumOp;
use regatta_core::aggs::window::{Frame, WindowFunction};
use regatta_core::arrays::array::Array;
use regatta_core::arrays::batch::Batch;
use regatta_core::arrays::datatype::DataType;
use regatta_core::arrays::schema::{Field, Schema, Table};
use regatta_core::cluster::local::LocalCluster;
use regatta_core::cluster::Communicator;
use regatta_core::engine::{execute_group_by, AggFunction, AggregateSpec, GroupBySpec, SortKey};
use regatta_error::{ErrorKind, Result};

fn int_table(names: [&str; 2], cols: [Vec<Option<i64>>; 2]) -> Table {
    let schema = Schema::new(names.map(|n| Field::new(n, DataType::Int64)));
    let [a, b] = cols;
    let batch = Batch::try_new([Array::from_iter(a), Array::from_iter(b)]).unwrap();
    Table::try_new(schema, batch).unwrap()
}

fn some(vals: Vec<i64>) -> Vec<Option<i64>> {
    vals.into_iter().map(Some).collect()
}

/// Merge every rank's (key, value) result rows into one map. Panics on a
/// duplicate key, since each group must be owned by exactly one rank.
fn collect_i64_pairs(results: &[Result<Table>], key: &str, val: &str) -> HashMap<i64, i64> {
    let mut pairs = HashMap::new();
    for result in results {
        let table = result.as_ref().unwrap();
        let keys = table
            .column_by_name(key)
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap();
        let vals = table
            .column_by_name(val)
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap();
        for (k, v) in keys.iter().zip(vals) {
            let prev = pairs.insert(*k, *v);
            assert!(prev.is_none(), "group {k} owned by two ranks");
        }
    }
    pairs
}

#[test]
fn sum_across_ranks() {
    // {A: [1,1,2,2], B: [10,20,30,40]} split so both ranks hold both keys.
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 2]), some(vec![10, 30])]),
            _ => int_table(["a", "b"], [some(vec![1, 2]), some(vec![20, 40])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "b",
                Some("b"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    let pairs = collect_i64_pairs(&results, "a", "b");
    assert_eq!(HashMap::from([(1, 30), (2, 70)]), pairs);
}

#[test]
fn count_excludes_nulls_but_size_does_not() {
    // {A: [1,1,2], B: [None, 5, None]}.
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 1]), vec![None, Some(5)]]),
            _ => int_table(["a", "b"], [some(vec![2]), vec![None]]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![
                AggregateSpec::new("b", Some("b"), AggFunction::Basic(BasicOp::Count)),
                AggregateSpec::new("count", None, AggFunction::Basic(BasicOp::Size)),
            ],
        );
        execute_group_by(comm, &table, &spec)
    });

    assert_eq!(
        HashMap::from([(1, 1), (2, 0)]),
        collect_i64_pairs(&results, "a", "b")
    );
    assert_eq!(
        HashMap::from([(1, 2), (2, 1)]),
        collect_i64_pairs(&results, "a", "count")
    );
}

#[test]
fn nunique_null_handling() {
    // {A: [1,1,1], B: [None, "x", None]} spread over two ranks.
    let run = |value_dropna: bool| {
        LocalCluster::run(2, |comm| {
            let schema = Schema::new([
                Field::new("a", DataType::Int64),
                Field::new("b", DataType::Utf8),
            ]);
            let (a, b) = match comm.rank() {
                0 => (vec![1_i64, 1], vec![None, Some("x")]),
                _ => (vec![1_i64], vec![None]),
            };
            let batch =
                Batch::try_new([Array::from_iter(a), Array::from_iter(b)]).unwrap();
            let table = Table::try_new(schema, batch).unwrap();

            let spec = GroupBySpec::new(
                ["a"],
                vec![AggregateSpec::new(
                    "uniques",
                    Some("b"),
                    AggFunction::NUnique {
                        dropna: value_dropna,
                    },
                )],
            );
            execute_group_by(comm, &table, &spec)
        })
    };

    assert_eq!(
        HashMap::from([(1, 1)]),
        collect_i64_pairs(&run(true), "a", "uniques")
    );
    assert_eq!(
        HashMap::from([(1, 2)]),
        collect_i64_pairs(&run(false), "a", "uniques")
    );
}

#[test]
fn nunique_under_heavy_duplication() {
    // Every value repeated many times per rank pushes the duplication ratio
    // over the pre-dedup threshold; the count must not change.
    let results = LocalCluster::run(3, |comm| {
        let mut keys = Vec::new();
        let mut vals = Vec::new();
        for v in 0..4_i64 {
            for _ in 0..10 {
                keys.push(Some(1 + (v % 2)));
                vals.push(Some(v + comm.rank() as i64));
            }
        }
        let table = int_table(["a", "b"], [keys, vals]);
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "uniques",
                Some("b"),
                AggFunction::NUnique { dropna: true },
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    // Rank r contributes values {r, r+2} to key 1 and {r+1, r+3} to key 2,
    // so across ranks 0..3 each key ends up with 5 distinct values.
    assert_eq!(
        HashMap::from([(1, 5), (2, 5)]),
        collect_i64_pairs(&results, "a", "uniques")
    );
}

#[test]
fn listagg_ordered_across_ranks() {
    // {A: [1,1], B: ["y","x"], C: [2,1]} with one row per rank.
    let results = LocalCluster::run(2, |comm| {
        let schema = Schema::new([
            Field::new("a", DataType::Int64),
            Field::new("b", DataType::Utf8),
            Field::new("c", DataType::Int64),
        ]);
        let (b, c) = match comm.rank() {
            0 => ("y", 2_i64),
            _ => ("x", 1_i64),
        };
        let batch = Batch::try_new([
            Array::from_iter([1_i64]),
            Array::from_iter([b]),
            Array::from_iter([c]),
        ])
        .unwrap();
        let table = Table::try_new(schema, batch).unwrap();

        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "joined",
                Some("b"),
                AggFunction::ListAgg {
                    separator: "-".into(),
                    order_by: vec![SortKey::asc("c")],
                },
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    let owner = results
        .iter()
        .map(|r| r.as_ref().unwrap())
        .find(|t| t.num_rows() == 1)
        .unwrap();
    assert_eq!("x-y", owner.column_by_name("joined").unwrap().utf8_value(0).unwrap());
}

#[test]
fn row_number_partitioned_across_ranks() {
    // {A: [1,1,2], C: [5,1,9]}: rank 0 holds the two A=1 rows.
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "c"], [some(vec![1, 1]), some(vec![5, 1])]),
            _ => int_table(["a", "c"], [some(vec![2]), some(vec![9])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "rn",
                Some("c"),
                AggFunction::Window {
                    function: WindowFunction::RowNumber,
                    order_by: vec![SortKey::asc("c")],
                    frame: Frame::default(),
                },
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    // Row-shaped output comes back aligned with each rank's input rows.
    let rank0 = results[0].as_ref().unwrap();
    assert_eq!(
        vec![2_i64, 1],
        rank0
            .column_by_name("rn")
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap()
            .to_vec()
    );
    let rank1 = results[1].as_ref().unwrap();
    assert_eq!(
        vec![1_i64],
        rank1
            .column_by_name("rn")
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap()
            .to_vec()
    );
}

#[test]
fn multi_rank_matches_single_rank() {
    let mut rng = StdRng::seed_from_u64(42);
    let rows: Vec<(i64, i64)> = (0..90)
        .map(|_| (rng.gen_range(0..7), rng.gen_range(-50..50)))
        .collect();

    let spec = GroupBySpec::new(
        ["a"],
        vec![
            AggregateSpec::new("sum", Some("b"), AggFunction::Basic(BasicOp::Sum)),
            AggregateSpec::new("min", Some("b"), AggFunction::Basic(BasicOp::Min)),
            AggregateSpec::new("max", Some("b"), AggFunction::Basic(BasicOp::Max)),
            AggregateSpec::new("n", Some("b"), AggFunction::Basic(BasicOp::Count)),
        ],
    );

    let run = |ranks: usize| {
        let rows = rows.clone();
        let spec = spec.clone();
        LocalCluster::run(ranks, move |comm| {
            let chunk = rows.len() / comm.size();
            let start = comm.rank() * chunk;
            let end = if comm.rank() + 1 == comm.size() {
                rows.len()
            } else {
                start + chunk
            };
            let slice = &rows[start..end];
            let table = int_table(
                ["a", "b"],
                [
                    some(slice.iter().map(|r| r.0).collect()),
                    some(slice.iter().map(|r| r.1).collect()),
                ],
            );
            execute_group_by(comm, &table, &spec)
        })
    };

    let single = run(1);
    let multi = run(3);
    for col in ["sum", "min", "max", "n"] {
        assert_eq!(
            collect_i64_pairs(&single, "a", col),
            collect_i64_pairs(&multi, "a", col),
            "column {col} differs between rank counts"
        );
    }
}

#[test]
fn pre_partitioned_input_is_unchanged_by_shuffle() {
    // Rank r already owns exactly the keys that hash to it; the shuffle is
    // then a no-op and results must still be exact.
    let all_keys: Vec<i64> = (0..20).collect();
    let results = LocalCluster::run(2, |comm| {
        let key_arr = Array::from_iter(all_keys.clone());
        let hashes =
            regatta_core::arrays::compute::hash::hash_arrays(&[&key_arr], all_keys.len())?;
        let mine: Vec<i64> = all_keys
            .iter()
            .zip(&hashes)
            .filter(|(_, h)| **h % 2 == comm.rank() as u64)
            .map(|(k, _)| *k)
            .collect();
        let vals = some(mine.iter().map(|k| k * 10).collect());
        let table = int_table(["a", "b"], [some(mine), vals]);
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "b",
                Some("b"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    let pairs = collect_i64_pairs(&results, "a", "b");
    assert_eq!(20, pairs.len());
    for k in 0..20 {
        assert_eq!(k * 10, pairs[&k]);
    }
}

#[test]
fn cumsum_chain_scan_matches_reverse_shuffle() {
    // Same data, same op: skipna=true rides the running-total propagation,
    // skipna=false takes the reverse-shuffle path. With no NULLs present the
    // two must agree exactly.
    let run = |skipna: bool| {
        LocalCluster::run(3, move |comm| {
            let base = comm.rank() as i64 * 4;
            let keys = some(vec![1, 2, 1, 2]);
            let vals = some(vec![base + 1, base + 2, base + 3, base + 4]);
            let table = int_table(["a", "b"], [keys, vals]);
            let mut spec = GroupBySpec::new(
                ["a"],
                vec![AggregateSpec::new(
                    "run",
                    Some("b"),
                    AggFunction::Cumulative(CumOp::Sum),
                )],
            );
            spec.aggregates[0].skipna = skipna;
            let out = execute_group_by(comm, &table, &spec)?;
            Ok(out
                .column_by_name("run")?
                .primitive_slice::<i64>()?
                .to_vec())
        })
    };

    let chain = run(true);
    let shuffled = run(false);
    for (a, b) in chain.iter().zip(&shuffled) {
        assert_eq!(a.as_ref().unwrap(), b.as_ref().unwrap());
    }
    // Spot-check the global running order: rank 0 rows come first.
    assert_eq!(vec![1_i64, 2, 4, 6], *chain[0].as_ref().unwrap());
    assert_eq!(vec![9_i64, 12, 16, 20], *chain[1].as_ref().unwrap());
}

#[test]
fn transform_and_shift_return_home() {
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 2]), some(vec![10, 30])]),
            _ => int_table(["a", "b"], [some(vec![1, 2]), some(vec![20, 40])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![
                AggregateSpec::new("total", Some("b"), AggFunction::Transform(BasicOp::Sum)),
                AggregateSpec::new("prev", Some("b"), AggFunction::Shift { offset: 1 }),
            ],
        );
        execute_group_by(comm, &table, &spec)
    });

    let rank0 = results[0].as_ref().unwrap();
    assert_eq!(
        vec![30_i64, 70],
        rank0
            .column_by_name("total")
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap()
            .to_vec()
    );
    // First row of each group has nothing to shift from.
    assert!(!rank0.column_by_name("prev").unwrap().is_valid(0));
    let rank1 = results[1].as_ref().unwrap();
    // Rank 1's rows are second in each group (global order is rank-major).
    assert_eq!(
        vec![10_i64, 30],
        rank1
            .column_by_name("prev")
            .unwrap()
            .primitive_slice::<i64>()
            .unwrap()
            .to_vec()
    );
}

#[test]
fn idxmin_uses_global_row_labels() {
    let results = LocalCluster::run(2, |comm| {
        // Global rows: rank 0 -> labels 0..2, rank 1 -> labels 2..4.
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 1]), some(vec![5, 3])]),
            _ => int_table(["a", "b"], [some(vec![1, 1]), some(vec![1, 9])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "at",
                Some("b"),
                AggFunction::IdxMin,
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    let owner = results
        .iter()
        .map(|r| r.as_ref().unwrap())
        .find(|t| t.num_rows() == 1)
        .unwrap();
    // Minimum value 1 sits on rank 1's first row, global label 2.
    assert_eq!(
        vec![2_u64],
        owner
            .column_by_name("at")
            .unwrap()
            .primitive_slice::<u64>()
            .unwrap()
            .to_vec()
    );
}

#[test]
fn var_and_median_across_ranks() {
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 1]), some(vec![1, 2])]),
            _ => int_table(["a", "b"], [some(vec![1, 1]), some(vec![3, 4])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![
                AggregateSpec::new("var", Some("b"), AggFunction::Var { ddof: 1 }),
                AggregateSpec::new("med", Some("b"), AggFunction::Median),
            ],
        );
        execute_group_by(comm, &table, &spec)
    });

    let owner = results
        .iter()
        .map(|r| r.as_ref().unwrap())
        .find(|t| t.num_rows() == 1)
        .unwrap();
    let var = owner.column_by_name("var").unwrap().primitive_slice::<f64>().unwrap()[0];
    // Sample variance of 1..=4 is 5/3.
    assert!((var - 5.0 / 3.0).abs() < 1e-12);
    let med = owner.column_by_name("med").unwrap().primitive_slice::<f64>().unwrap()[0];
    assert_eq!(2.5, med);
}

#[test]
fn overflow_fails_every_rank_consistently() {
    let results = LocalCluster::run(3, |comm| {
        // Both MAX rows share key 1, so one rank's sum overflows. Every other
        // rank must fail too instead of blocking.
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [some(vec![1, 2]), some(vec![i64::MAX, 5])]),
            1 => int_table(["a", "b"], [some(vec![1, 3]), some(vec![i64::MAX, 6])]),
            _ => int_table(["a", "b"], [some(vec![2, 3]), some(vec![7, 8])]),
        };
        let spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "b",
                Some("b"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        execute_group_by(comm, &table, &spec)
    });

    let mut overflow = 0;
    let mut peer_failure = 0;
    for result in &results {
        match result.as_ref().unwrap_err().kind() {
            ErrorKind::Overflow => overflow += 1,
            ErrorKind::PeerFailure => peer_failure += 1,
            other => panic!("unexpected error kind {other:?}"),
        }
    }
    assert_eq!(1, overflow);
    assert_eq!(2, peer_failure);
}

#[test]
fn dropna_false_keeps_null_keyed_group() {
    let results = LocalCluster::run(2, |comm| {
        let table = match comm.rank() {
            0 => int_table(["a", "b"], [vec![Some(1), None], some(vec![10, 1])]),
            _ => int_table(["a", "b"], [vec![None, Some(1)], some(vec![2, 20])]),
        };
        let mut spec = GroupBySpec::new(
            ["a"],
            vec![AggregateSpec::new(
                "b",
                Some("b"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        spec.dropna = false;
        execute_group_by(comm, &table, &spec)
    });

    // NULL keys from both ranks merge into one group summing 1 + 2.
    let mut total_groups = 0;
    let mut null_group_sum = None;
    for result in &results {
        let table = result.as_ref().unwrap();
        let keys = table.column_by_name("a").unwrap();
        let sums = table.column_by_name("b").unwrap();
        total_groups += table.num_rows();
        for row in 0..table.num_rows() {
            if !keys.is_valid(row) {
                null_group_sum = Some(sums.primitive_slice::<i64>().unwrap()[row]);
            }
        }
    }
    assert_eq!(2, total_groups);
    assert_eq!(Some(3), null_group_sum);
}
