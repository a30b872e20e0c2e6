use regatta_error::Result;

use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::batch::Batch;
use crate::arrays::bitmap::Bitmap;
use crate::arrays::datatype::PhysicalType;
use crate::arrays::storage::{BinaryStorage, BooleanStorage, Utf8Storage};

/// Build a new array by gathering `indices` from `arr`.
///
/// Indices may repeat and may be in any order. NULLs are carried along.
pub fn take(arr: &Array, indices: &[usize]) -> Result<Array> {
    let validity = take_validity(arr, indices);

    match arr.datatype().physical_type() {
        PhysicalType::Boolean => {
            let mut out = BooleanStorage::with_capacity(indices.len());
            for &idx in indices {
                out.push(arr.bool_value(idx)?);
            }
            Array::new_with_validity(arr.datatype().clone(), out, validity)
        }
        PhysicalType::Utf8 => {
            let mut out = Utf8Storage::with_capacity(indices.len());
            for &idx in indices {
                out.try_push(arr.utf8_value(idx)?)?;
            }
            Array::new_with_validity(arr.datatype().clone(), out, validity)
        }
        PhysicalType::Binary => {
            let mut out = BinaryStorage::with_capacity(indices.len());
            for &idx in indices {
                out.try_push(arr.binary_value(idx)?)?;
            }
            Array::new_with_validity(arr.datatype().clone(), out, validity)
        }
        phys => primitive_dispatch!(phys, take_primitive(arr, indices, validity), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        }),
    }
}

fn take_primitive<T: PhysicalPrimitive>(
    arr: &Array,
    indices: &[usize],
    validity: Bitmap,
) -> Result<Array> {
    let values = arr.primitive_slice::<T>()?;
    let out: Vec<T> = indices.iter().map(|&idx| values[idx]).collect();
    Array::from_primitive_values(arr.datatype().clone(), out, validity)
}

fn take_validity(arr: &Array, indices: &[usize]) -> Bitmap {
    if arr.all_valid() {
        return Bitmap::new_with_all_true(indices.len());
    }
    indices.iter().map(|&idx| arr.is_valid(idx)).collect()
}

/// Gather the same indices from every column of a batch.
pub fn take_batch(batch: &Batch, indices: &[usize]) -> Result<Batch> {
    let cols = batch
        .columns()
        .iter()
        .map(|col| take(col, indices))
        .collect::<Result<Vec<_>>>()?;

    if cols.is_empty() {
        return Ok(Batch::empty_with_num_rows(indices.len()));
    }
    Batch::try_new(cols)
}
