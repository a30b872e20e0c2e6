use regatta_error::{RegattaError, Result};

use super::array::Array;

/// A batch of same-length arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Columns that make up this batch.
    cols: Vec<Array>,
    /// Number of rows in this batch. Needed to allow for a batch that has no
    /// columns but a non-zero number of rows (e.g. a `count(*)` input).
    num_rows: usize,
}

impl Batch {
    pub const fn empty() -> Self {
        Batch {
            cols: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn empty_with_num_rows(num_rows: usize) -> Self {
        Batch {
            cols: Vec::new(),
            num_rows,
        }
    }

    /// Create a new batch from some number of arrays.
    ///
    /// All arrays must have the same length.
    pub fn try_new(cols: impl IntoIterator<Item = Array>) -> Result<Self> {
        let cols: Vec<_> = cols.into_iter().collect();
        let len = match cols.first() {
            Some(arr) => arr.len(),
            None => return Ok(Self::empty()),
        };

        for (idx, col) in cols.iter().enumerate() {
            if col.len() != len {
                return Err(RegattaError::new("Unexpected column length")
                    .with_field("expected", len)
                    .with_field("got", col.len())
                    .with_field("column_idx", idx));
            }
        }

        Ok(Batch {
            cols,
            num_rows: len,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.cols.len()
    }

    pub fn column(&self, idx: usize) -> Option<&Array> {
        self.cols.get(idx)
    }

    pub fn columns(&self) -> &[Array] {
        &self.cols
    }

    pub fn into_columns(self) -> Vec<Array> {
        self.cols
    }

    /// Cheap column projection; array storage is shared.
    pub fn project(&self, indices: &[usize]) -> Result<Self> {
        let cols = indices
            .iter()
            .map(|&idx| {
                self.cols
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| {
                        RegattaError::new("Projection index out of bounds").with_field("idx", idx)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Batch {
            cols,
            num_rows: self.num_rows,
        })
    }

    /// Append a column, keeping the row count invariant.
    pub fn try_push_column(&mut self, col: Array) -> Result<()> {
        if !self.cols.is_empty() && col.len() != self.num_rows {
            return Err(RegattaError::new("Unexpected column length")
                .with_field("expected", self.num_rows)
                .with_field("got", col.len()));
        }
        if self.cols.is_empty() {
            self.num_rows = col.len();
        }
        self.cols.push(col);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_lengths_rejected() {
        let a = Array::from_iter([1_i64, 2, 3]);
        let b = Array::from_iter([1_i64, 2]);
        assert!(Batch::try_new([a, b]).is_err());
    }

    #[test]
    fn zero_column_batch_keeps_rows() {
        let batch = Batch::empty_with_num_rows(5);
        assert_eq!(5, batch.num_rows());
        assert_eq!(0, batch.num_columns());
    }

    #[test]
    fn project_shares_storage() {
        let batch = Batch::try_new([
            Array::from_iter([1_i64, 2]),
            Array::from_iter(["a", "b"]),
        ])
        .unwrap();
        let projected = batch.project(&[1]).unwrap();
        assert_eq!(1, projected.num_columns());
        assert_eq!(2, projected.num_rows());
    }
}
