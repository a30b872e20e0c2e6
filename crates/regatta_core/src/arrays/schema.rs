use regatta_error::{ErrorKind, RegattaError, Result};
use serde::{Deserialize, Serialize};

use super::batch::Batch;
use super::datatype::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub datatype: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Field {
            name: name.into(),
            datatype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Schema {
            fields: fields.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Schema { fields: Vec::new() }
    }

    /// Resolve a column name to its index.
    pub fn resolve(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| {
                RegattaError::with_kind(ErrorKind::InvalidSchema, "Column does not exist")
                    .with_field("column", name)
            })
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }
}

/// The engine's operand and result type: a schema plus rank-local rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: Schema,
    pub batch: Batch,
}

impl Table {
    pub fn try_new(schema: Schema, batch: Batch) -> Result<Self> {
        if schema.fields.len() != batch.num_columns() {
            return Err(
                RegattaError::with_kind(ErrorKind::InvalidSchema, "Schema and batch mismatch")
                    .with_field("fields", schema.fields.len())
                    .with_field("columns", batch.num_columns()),
            );
        }
        for (field, col) in schema.fields.iter().zip(batch.columns()) {
            if &field.datatype != col.datatype() {
                return Err(RegattaError::with_kind(
                    ErrorKind::InvalidSchema,
                    "Column type does not match schema",
                )
                .with_field("column", &field.name)
                .with_field("expected", field.datatype)
                .with_field("got", *col.datatype()));
            }
        }
        Ok(Table { schema, batch })
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn column_by_name(&self, name: &str) -> Result<&super::array::Array> {
        let idx = self.schema.resolve(name)?;
        self.batch
            .column(idx)
            .ok_or_else(|| RegattaError::new("Batch missing resolved column"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::Array;

    #[test]
    fn resolve_missing_column() {
        let schema = Schema::new([Field::new("a", DataType::Int64)]);
        let err = schema.resolve("b").unwrap_err();
        assert_eq!(ErrorKind::InvalidSchema, err.kind());
    }

    #[test]
    fn table_schema_mismatch() {
        let schema = Schema::new([Field::new("a", DataType::Int32)]);
        let batch = Batch::try_new([Array::from_iter([1_i64])]).unwrap();
        assert!(Table::try_new(schema, batch).is_err());
    }
}
