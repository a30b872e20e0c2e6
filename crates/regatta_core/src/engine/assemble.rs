//! Result assembly for reduction aggregates: key columns from group
//! representatives, aggregate columns in spec order, optional sort by key.

use regatta_error::Result;

use super::spec::GroupBySpec;
use crate::arrays::array::Array;
use crate::arrays::batch::Batch;
use crate::arrays::compute::cmp::{sort_rows_by, SortColumn};
use crate::arrays::compute::take::take;
use crate::arrays::schema::{Schema, Table};
use crate::grouping::GroupMap;

/// Build this rank's slice of the result table. One row per group owned by
/// this rank; `agg_cols` holds one finalized column per aggregate, each with
/// `map.num_groups()` rows.
pub(crate) fn assemble_reduction(
    input_schema: &Schema,
    spec: &GroupBySpec,
    key_cols: &[&Array],
    map: &GroupMap,
    mut agg_cols: Vec<Array>,
) -> Result<Table> {
    let reps = map.representatives();
    let mut key_out: Vec<Array> = key_cols
        .iter()
        .map(|col| take(col, reps))
        .collect::<Result<_>>()?;

    if spec.sort {
        let sort_cols: Vec<SortColumn> = key_out.iter().map(SortColumn::asc).collect();
        let mut order: Vec<usize> = (0..map.num_groups()).collect();
        sort_rows_by(&mut order, &sort_cols)?;

        key_out = key_out
            .iter()
            .map(|col| take(col, &order))
            .collect::<Result<_>>()?;
        agg_cols = agg_cols
            .iter()
            .map(|col| take(col, &order))
            .collect::<Result<_>>()?;
    }

    let mut columns = Vec::with_capacity(key_out.len() + agg_cols.len());
    if spec.as_index {
        columns.extend(key_out);
    }
    columns.extend(agg_cols);

    let schema = Schema::new(spec.output_fields(input_schema)?);
    Table::try_new(schema, Batch::try_new(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::basic::{compute_basic, BasicOp};
    use crate::arrays::datatype::DataType;
    use crate::arrays::schema::Field;
    use crate::engine::spec::{AggFunction, AggregateSpec};

    fn setup() -> (Schema, Array, Array) {
        let schema = Schema::new([
            Field::new("k", DataType::Int64),
            Field::new("v", DataType::Int64),
        ]);
        let keys = Array::from_iter([3_i64, 1, 3, 1]);
        let vals = Array::from_iter([10_i64, 20, 30, 40]);
        (schema, keys, vals)
    }

    #[test]
    fn sorted_output_orders_groups_by_key() {
        let (schema, keys, vals) = setup();
        let map = GroupMap::build(&[&keys], 4, true).unwrap();
        let sums = compute_basic(BasicOp::Sum, Some(&vals), &map).unwrap();

        let mut spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "total",
                Some("v"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        spec.sort = true;

        let table = assemble_reduction(&schema, &spec, &[&keys], &map, vec![sums]).unwrap();
        assert_eq!(
            vec![1_i64, 3],
            table
                .column_by_name("k")
                .unwrap()
                .primitive_slice::<i64>()
                .unwrap()
                .to_vec()
        );
        assert_eq!(
            vec![60_i64, 40],
            table
                .column_by_name("total")
                .unwrap()
                .primitive_slice::<i64>()
                .unwrap()
                .to_vec()
        );
    }

    #[test]
    fn without_index_only_aggregates_remain() {
        let (schema, keys, vals) = setup();
        let map = GroupMap::build(&[&keys], 4, true).unwrap();
        let sums = compute_basic(BasicOp::Sum, Some(&vals), &map).unwrap();

        let mut spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "total",
                Some("v"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        spec.as_index = false;

        let table = assemble_reduction(&schema, &spec, &[&keys], &map, vec![sums]).unwrap();
        assert_eq!(1, table.batch.num_columns());
        assert!(table.schema.resolve("k").is_err());
    }

    #[test]
    fn zero_groups_give_zero_rows() {
        let schema = Schema::new([
            Field::new("k", DataType::Int64),
            Field::new("v", DataType::Int64),
        ]);
        let keys = Array::from_iter([None::<i64>]);
        let vals = Array::from_iter([1_i64]);
        let map = GroupMap::build(&[&keys], 1, true).unwrap();
        let sums = compute_basic(BasicOp::Sum, Some(&vals), &map).unwrap();

        let spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "total",
                Some("v"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        let table = assemble_reduction(&schema, &spec, &[&keys], &map, vec![sums]).unwrap();
        assert_eq!(0, table.num_rows());
    }
}
