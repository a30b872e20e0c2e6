//! Query description: keys, flags, and the list of aggregates to compute.
//!
//! Specs are validated before any communication. Every rank constructs the
//! same spec, so a validation failure raises locally on all ranks at once and
//! no rank is left waiting in a collective.

use regatta_error::{ErrorKind, RegattaError, Result};
use serde::{Deserialize, Serialize};

use crate::aggs::basic::BasicOp;
use crate::aggs::cumulative::CumOp;
use crate::aggs::window::{Frame, WindowFunction};
use crate::arrays::datatype::DataType;
use crate::arrays::schema::{Field, Schema};

/// One column of a multi-column ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            desc: false,
            nulls_first: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggFunction {
    Basic(BasicOp),
    Var { ddof: u32 },
    Std { ddof: u32 },
    Median,
    Quantile { q: f64 },
    NUnique { dropna: bool },
    IdxMin,
    IdxMax,
    ListAgg {
        separator: String,
        order_by: Vec<SortKey>,
    },
    /// Row-shaped: one output per input row.
    Cumulative(CumOp),
    Shift { offset: i64 },
    Transform(BasicOp),
    Window {
        function: WindowFunction,
        order_by: Vec<SortKey>,
        frame: Frame,
    },
}

impl AggFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic(op) => op.name(),
            Self::Var { .. } => "var",
            Self::Std { .. } => "std",
            Self::Median => "median",
            Self::Quantile { .. } => "quantile",
            Self::NUnique { .. } => "nunique",
            Self::IdxMin => "idxmin",
            Self::IdxMax => "idxmax",
            Self::ListAgg { .. } => "listagg",
            Self::Cumulative(op) => op.name(),
            Self::Shift { .. } => "shift",
            Self::Transform(_) => "transform",
            Self::Window { function, .. } => function.name(),
        }
    }

    /// Row-shaped functions emit one value per input row instead of one per
    /// group, and their results go back to the rank each row came from.
    pub fn is_row_shaped(&self) -> bool {
        matches!(
            self,
            Self::Cumulative(_) | Self::Shift { .. } | Self::Transform(_) | Self::Window { .. }
        )
    }

    pub fn needs_input(&self) -> bool {
        match self {
            Self::Basic(BasicOp::Size) => false,
            Self::Transform(BasicOp::Size) => false,
            Self::Window { function, .. } => function.needs_input(),
            _ => true,
        }
    }

    /// Output type given the input column's type. Errors here are the
    /// plan-time half of the type checks; the compute kernels repeat them at
    /// run time.
    pub fn output_datatype(&self, input: Option<&DataType>) -> Result<DataType> {
        let required = || {
            input.ok_or_else(|| {
                RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Aggregate requires an input column",
                )
                .with_field("function", self.name())
            })
        };

        match self {
            Self::Basic(op) | Self::Transform(op) => {
                if matches!(op, BasicOp::Size) {
                    return Ok(DataType::Int64);
                }
                op.output_datatype(required()?)
            }
            Self::Var { .. } | Self::Std { .. } => {
                let input = required()?;
                if input.is_numeric() {
                    Ok(DataType::Float64)
                } else {
                    Err(undefined_for(self.name(), input))
                }
            }
            Self::Median | Self::Quantile { .. } => {
                if let Self::Quantile { q } = self {
                    if !(0.0..=1.0).contains(q) {
                        return Err(RegattaError::with_kind(
                            ErrorKind::InvalidSchema,
                            "Quantile must be in [0, 1]",
                        )
                        .with_field("q", q));
                    }
                }
                match required()? {
                    DataType::Decimal128(meta) => Ok(DataType::Decimal128(*meta)),
                    dt if dt.is_numeric() => Ok(DataType::Float64),
                    other => Err(undefined_for(self.name(), other)),
                }
            }
            Self::NUnique { .. } => {
                required()?;
                Ok(DataType::Int64)
            }
            Self::IdxMin | Self::IdxMax => {
                required()?;
                Ok(DataType::UInt64)
            }
            Self::ListAgg { .. } => match required()? {
                DataType::Utf8 => Ok(DataType::Utf8),
                other => Err(undefined_for(self.name(), other)),
            },
            Self::Cumulative(op) => {
                let input = required()?;
                match op {
                    CumOp::Min | CumOp::Max if input.is_numeric() => Ok(input.clone()),
                    CumOp::Sum | CumOp::Prod if input.is_numeric() => {
                        if matches!(input, DataType::Decimal128(_)) && *op == CumOp::Prod {
                            Err(undefined_for(self.name(), input))
                        } else {
                            Ok(input.clone())
                        }
                    }
                    _ => Err(undefined_for(self.name(), input)),
                }
            }
            Self::Shift { .. } => Ok(required()?.clone()),
            Self::Window { function, frame, .. } => {
                frame.validate()?;
                match function {
                    WindowFunction::RowNumber
                    | WindowFunction::Rank
                    | WindowFunction::DenseRank => Ok(DataType::Int64),
                    WindowFunction::Ntile { buckets } => {
                        if *buckets == 0 {
                            return Err(RegattaError::with_kind(
                                ErrorKind::InvalidSchema,
                                "NTILE bucket count must be positive",
                            ));
                        }
                        Ok(DataType::Int64)
                    }
                    WindowFunction::PercentRank | WindowFunction::CumeDist => {
                        Ok(DataType::Float64)
                    }
                    _ => Ok(required()?.clone()),
                }
            }
        }
    }

    /// Columns the function orders by, if any.
    pub fn order_by(&self) -> &[SortKey] {
        match self {
            Self::ListAgg { order_by, .. } | Self::Window { order_by, .. } => order_by,
            _ => &[],
        }
    }
}

fn undefined_for(name: &str, datatype: &DataType) -> RegattaError {
    RegattaError::with_kind(ErrorKind::InvalidType, "Aggregate undefined for data type")
        .with_field("function", name.to_string())
        .with_field("datatype", datatype.clone())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Name of the output column.
    pub output_name: String,
    /// Input column, if the function reads one (`size` does not).
    pub input: Option<String>,
    pub function: AggFunction,
    /// NULL handling for the cumulative family: skip (true) or poison the
    /// rest of the group (false). Reductions always skip NULL inputs.
    #[serde(default = "default_true")]
    pub skipna: bool,
}

fn default_true() -> bool {
    true
}

impl AggregateSpec {
    pub fn new(output_name: impl Into<String>, input: Option<&str>, function: AggFunction) -> Self {
        AggregateSpec {
            output_name: output_name.into(),
            input: input.map(Into::into),
            function,
            skipna: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBySpec {
    /// Key columns, in order.
    pub keys: Vec<String>,
    /// Drop rows with NULL in any key column. Otherwise NULL groups with
    /// NULL.
    #[serde(default = "default_true")]
    pub dropna: bool,
    /// Sort result rows by the key columns (reduction output only).
    #[serde(default)]
    pub sort: bool,
    /// Emit the key columns in the result. Without them the caller gets just
    /// the aggregate columns, one row per group in group order.
    #[serde(default = "default_true")]
    pub as_index: bool,
    /// Shuffle on only the first N key columns. Correctness-sensitive: the
    /// caller asserts rows sharing that prefix never need cross-rank merging.
    #[serde(default)]
    pub key_shuffle_prefix: Option<usize>,
    pub aggregates: Vec<AggregateSpec>,
}

impl GroupBySpec {
    pub fn new(
        keys: impl IntoIterator<Item = impl Into<String>>,
        aggregates: Vec<AggregateSpec>,
    ) -> Self {
        GroupBySpec {
            keys: keys.into_iter().map(Into::into).collect(),
            dropna: true,
            sort: false,
            as_index: true,
            key_shuffle_prefix: None,
            aggregates,
        }
    }

    /// Whether every aggregate is row-shaped. Mixing shapes in one spec is
    /// rejected by [`Self::validate`].
    pub fn is_row_shaped(&self) -> bool {
        self.aggregates
            .first()
            .is_some_and(|a| a.function.is_row_shaped())
    }

    /// Plan-time validation against the input schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.keys.is_empty() {
            return Err(RegattaError::with_kind(
                ErrorKind::InvalidSchema,
                "Grouping requires at least one key column",
            ));
        }
        for key in &self.keys {
            schema.resolve(key)?;
        }
        if let Some(prefix) = self.key_shuffle_prefix {
            if prefix == 0 || prefix > self.keys.len() {
                return Err(RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Key shuffle prefix out of range",
                )
                .with_field("prefix", prefix)
                .with_field("keys", self.keys.len()));
            }
        }
        if self.aggregates.is_empty() {
            return Err(RegattaError::with_kind(
                ErrorKind::InvalidSchema,
                "Grouping requires at least one aggregate",
            ));
        }

        let mut seen_names = std::collections::HashSet::new();
        let mut any_reduction = false;
        let mut any_row_shaped = false;
        for agg in &self.aggregates {
            if !seen_names.insert(agg.output_name.as_str()) {
                return Err(RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Duplicate output column name",
                )
                .with_field("column", &agg.output_name));
            }

            let input_type = match &agg.input {
                Some(name) => {
                    let idx = schema.resolve(name)?;
                    schema.field(idx).map(|f| &f.datatype)
                }
                None => None,
            };
            if agg.function.needs_input() && input_type.is_none() {
                return Err(RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Aggregate requires an input column",
                )
                .with_field("function", agg.function.name())
                .with_field("output", &agg.output_name));
            }
            agg.function.output_datatype(input_type)?;

            for sort_key in agg.function.order_by() {
                schema.resolve(&sort_key.column)?;
            }

            if agg.function.is_row_shaped() {
                any_row_shaped = true;
            } else {
                any_reduction = true;
            }
        }

        if any_reduction && any_row_shaped {
            return Err(RegattaError::with_kind(
                ErrorKind::InvalidSchema,
                "Cannot mix per-group and per-row aggregates in one grouping",
            ));
        }

        Ok(())
    }

    /// Fields of the result table, in output order.
    pub fn output_fields(&self, schema: &Schema) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        if self.as_index && !self.is_row_shaped() {
            for key in &self.keys {
                let idx = schema.resolve(key)?;
                if let Some(field) = schema.field(idx) {
                    fields.push(field.clone());
                }
            }
        }
        for agg in &self.aggregates {
            let input_type = match &agg.input {
                Some(name) => {
                    let idx = schema.resolve(name)?;
                    schema.field(idx).map(|f| &f.datatype)
                }
                None => None,
            };
            let datatype = agg.function.output_datatype(input_type)?;
            fields.push(Field::new(agg.output_name.clone(), datatype));
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new([
            Field::new("k", DataType::Int64),
            Field::new("v", DataType::Int64),
            Field::new("s", DataType::Utf8),
        ])
    }

    #[test]
    fn missing_column_rejected() {
        let spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "out",
                Some("nope"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        let err = spec.validate(&schema()).unwrap_err();
        assert_eq!(ErrorKind::InvalidSchema, err.kind());
    }

    #[test]
    fn duplicate_output_names_rejected() {
        let spec = GroupBySpec::new(
            ["k"],
            vec![
                AggregateSpec::new("out", Some("v"), AggFunction::Basic(BasicOp::Sum)),
                AggregateSpec::new("out", Some("v"), AggFunction::Basic(BasicOp::Min)),
            ],
        );
        assert!(spec.validate(&schema()).is_err());
    }

    #[test]
    fn mixed_shapes_rejected() {
        let spec = GroupBySpec::new(
            ["k"],
            vec![
                AggregateSpec::new("a", Some("v"), AggFunction::Basic(BasicOp::Sum)),
                AggregateSpec::new("b", Some("v"), AggFunction::Cumulative(CumOp::Sum)),
            ],
        );
        let err = spec.validate(&schema()).unwrap_err();
        assert_eq!(ErrorKind::InvalidSchema, err.kind());
    }

    #[test]
    fn type_errors_caught_at_plan_time() {
        // sum over a string column.
        let spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "out",
                Some("s"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        let err = spec.validate(&schema()).unwrap_err();
        assert_eq!(ErrorKind::InvalidType, err.kind());
    }

    #[test]
    fn quantile_range_checked() {
        let spec = GroupBySpec::new(
            ["k"],
            vec![AggregateSpec::new(
                "out",
                Some("v"),
                AggFunction::Quantile { q: 1.5 },
            )],
        );
        assert!(spec.validate(&schema()).is_err());
    }

    #[test]
    fn prefix_hint_bounds() {
        let mut spec = GroupBySpec::new(
            ["k", "v"],
            vec![AggregateSpec::new(
                "out",
                Some("v"),
                AggFunction::Basic(BasicOp::Sum),
            )],
        );
        spec.key_shuffle_prefix = Some(3);
        assert!(spec.validate(&schema()).is_err());
        spec.key_shuffle_prefix = Some(1);
        assert!(spec.validate(&schema()).is_ok());
    }

    #[test]
    fn output_fields_reflect_spec() {
        let spec = GroupBySpec::new(
            ["k"],
            vec![
                AggregateSpec::new("total", Some("v"), AggFunction::Basic(BasicOp::Sum)),
                AggregateSpec::new("avg", Some("v"), AggFunction::Basic(BasicOp::Mean)),
            ],
        );
        let fields = spec.output_fields(&schema()).unwrap();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(vec!["k", "total", "avg"], names);
        assert_eq!(DataType::Float64, fields[2].datatype);
    }
}
