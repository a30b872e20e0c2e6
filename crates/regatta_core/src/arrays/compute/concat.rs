use regatta_error::{RegattaError, Result};

use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::batch::Batch;
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::{DataType, PhysicalType};
use crate::arrays::storage::{BinaryStorage, BooleanStorage, Utf8Storage};

/// Concatenate arrays of the same data type into one.
pub fn concat(arrays: &[&Array]) -> Result<Array> {
    let datatype = match arrays.first() {
        Some(arr) => arr.datatype().clone(),
        None => return Err(RegattaError::new("Cannot concat zero arrays")),
    };

    for arr in arrays {
        if arr.datatype() != &datatype {
            return Err(RegattaError::new("Array type mismatch in concat")
                .with_field("expected", &datatype)
                .with_field("got", arr.datatype()));
        }
    }

    let total: usize = arrays.iter().map(|a| a.len()).sum();
    let mut validity = Bitmap::with_capacity(total);
    for arr in arrays {
        for idx in 0..arr.len() {
            validity.push(arr.is_valid(idx));
        }
    }

    match datatype.physical_type() {
        PhysicalType::Boolean => {
            let mut out = BooleanStorage::with_capacity(total);
            for arr in arrays {
                for idx in 0..arr.len() {
                    out.push(arr.bool_value(idx)?);
                }
            }
            Array::new_with_validity(datatype, out, validity)
        }
        PhysicalType::Utf8 => {
            let mut out = Utf8Storage::with_capacity(total);
            for arr in arrays {
                for idx in 0..arr.len() {
                    out.try_push(arr.utf8_value(idx)?)?;
                }
            }
            Array::new_with_validity(datatype, out, validity)
        }
        PhysicalType::Binary => {
            let mut out = BinaryStorage::with_capacity(total);
            for arr in arrays {
                for idx in 0..arr.len() {
                    out.try_push(arr.binary_value(idx)?)?;
                }
            }
            Array::new_with_validity(datatype, out, validity)
        }
        phys => primitive_dispatch!(phys, concat_primitive(arrays, datatype.clone(), validity), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        }),
    }
}

fn concat_primitive<T: PhysicalPrimitive>(
    arrays: &[&Array],
    datatype: DataType,
    validity: Bitmap,
) -> Result<Array> {
    let mut out = Vec::with_capacity(validity.len());
    for arr in arrays {
        out.extend_from_slice(arr.primitive_slice::<T>()?);
    }
    Array::from_primitive_values(datatype, out, validity)
}

/// Concatenate batches row-wise. All batches must share column count and
/// column types.
pub fn concat_batches(batches: &[Batch]) -> Result<Batch> {
    let num_cols = match batches.first() {
        Some(b) => b.num_columns(),
        None => return Ok(Batch::empty()),
    };

    if num_cols == 0 {
        let num_rows = batches.iter().map(|b| b.num_rows()).sum();
        return Ok(Batch::empty_with_num_rows(num_rows));
    }

    let mut cols = Vec::with_capacity(num_cols);
    for col_idx in 0..num_cols {
        let arrays = batches
            .iter()
            .map(|b| {
                b.column(col_idx).ok_or_else(|| {
                    RegattaError::new("Batch missing column in concat")
                        .with_field("column_idx", col_idx)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        cols.push(concat(&arrays)?);
    }

    Batch::try_new(cols)
}
