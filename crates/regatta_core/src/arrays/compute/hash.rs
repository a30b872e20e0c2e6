use ahash::RandomState;
use regatta_error::Result;

use crate::arrays::array::{primitive_dispatch, Array, PhysicalPrimitive};
use crate::arrays::datatype::PhysicalType;

/// State used for all hashing during execution.
///
/// Seeds are fixed so that every rank hashes a key tuple to the same value;
/// row routing depends on it.
pub const HASH_RANDOM_STATE: RandomState = RandomState::with_seeds(0, 0, 0, 0);

/// Hash assigned to NULL values.
///
/// NULL is a distinguishable key value, so it needs a stable hash like any
/// other value.
pub const NULL_HASH: u64 = 0xA21258D088C87A13;

/// Combine two hashes into a single value. Order-dependent fold: permuted
/// key tuples hash differently.
///
/// Seed folding from boost's hash_combine, finalized with hash_mix:
/// <https://github.com/boostorg/container_hash/blob/b8179488b20eb1373bdbf5c7fcca963f072512df/include/boost/container_hash/detail/hash_mix.hpp#L67>
pub const fn combine_hashes(v1: u64, v2: u64) -> u64 {
    const fn mix(mut x: u64) -> u64 {
        const M: u64 = 0xE9846AF9B1A615D;
        x ^= x.wrapping_shr(32);
        x = x.wrapping_mul(M);
        x ^= x.wrapping_shr(32);
        x = x.wrapping_mul(M);
        x ^= x.wrapping_shr(28);
        x
    }

    let folded = v1
        ^ v2.wrapping_add(0x9E3779B97F4A7C15)
            .wrapping_add(v1.wrapping_shl(6))
            .wrapping_add(v1.wrapping_shr(2));
    mix(folded)
}

/// Hash every row of `arrays` (a key tuple per row), writing into a fresh
/// vector. Hashes of individual columns are combined left to right.
pub fn hash_arrays(arrays: &[&Array], num_rows: usize) -> Result<Vec<u64>> {
    let mut hashes = vec![0_u64; num_rows];
    for (col_idx, arr) in arrays.iter().enumerate() {
        hash_array(arr, &mut hashes, col_idx > 0)?;
    }
    Ok(hashes)
}

/// Hash a single array into `hashes`.
///
/// When `combine` is set, existing hash values are mixed with this column's
/// instead of overwritten.
pub fn hash_array(arr: &Array, hashes: &mut [u64], combine: bool) -> Result<()> {
    debug_assert_eq!(arr.len(), hashes.len());

    match arr.datatype().physical_type() {
        PhysicalType::Boolean => {
            hash_with(hashes, combine, |idx| {
                if arr.is_valid(idx) {
                    HASH_RANDOM_STATE.hash_one(arr.bool_value(idx).expect("boolean storage"))
                } else {
                    NULL_HASH
                }
            });
            Ok(())
        }
        PhysicalType::Utf8 => {
            hash_with(hashes, combine, |idx| {
                if arr.is_valid(idx) {
                    HASH_RANDOM_STATE.hash_one(arr.utf8_value(idx).expect("utf8 storage"))
                } else {
                    NULL_HASH
                }
            });
            Ok(())
        }
        PhysicalType::Binary => {
            hash_with(hashes, combine, |idx| {
                if arr.is_valid(idx) {
                    HASH_RANDOM_STATE.hash_one(arr.binary_value(idx).expect("binary storage"))
                } else {
                    NULL_HASH
                }
            });
            Ok(())
        }
        phys => primitive_dispatch!(phys, hash_primitive(arr, hashes, combine), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        }),
    }
}

fn hash_primitive<T>(arr: &Array, hashes: &mut [u64], combine: bool) -> Result<()>
where
    T: PhysicalPrimitive + HashValue,
{
    let values = arr.primitive_slice::<T>()?;

    if arr.all_valid() {
        hash_with(hashes, combine, |idx| values[idx].hash_one());
    } else {
        hash_with(hashes, combine, |idx| {
            if arr.is_valid(idx) {
                values[idx].hash_one()
            } else {
                NULL_HASH
            }
        });
    }

    Ok(())
}

fn hash_with(hashes: &mut [u64], combine: bool, f: impl Fn(usize) -> u64) {
    if combine {
        for (idx, hash) in hashes.iter_mut().enumerate() {
            *hash = combine_hashes(*hash, f(idx));
        }
    } else {
        for (idx, hash) in hashes.iter_mut().enumerate() {
            *hash = f(idx);
        }
    }
}

/// Helper trait for hashing values.
///
/// Mostly here for floats since they don't implement `Hash`.
trait HashValue {
    fn hash_one(&self) -> u64;
}

macro_rules! impl_hash_value {
    ($typ:ty) => {
        impl HashValue for $typ {
            fn hash_one(&self) -> u64 {
                HASH_RANDOM_STATE.hash_one(self)
            }
        }
    };
}

impl_hash_value!(i8);
impl_hash_value!(i16);
impl_hash_value!(i32);
impl_hash_value!(i64);
impl_hash_value!(i128);
impl_hash_value!(u8);
impl_hash_value!(u16);
impl_hash_value!(u32);
impl_hash_value!(u64);

impl HashValue for f32 {
    fn hash_one(&self) -> u64 {
        HASH_RANDOM_STATE.hash_one(self.to_ne_bytes())
    }
}

impl HashValue for f64 {
    fn hash_one(&self) -> u64 {
        HASH_RANDOM_STATE.hash_one(self.to_ne_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_hashes_not_zero() {
        assert_ne!(0, combine_hashes(0, 0));
    }

    #[test]
    fn null_gets_null_hash() {
        let arr = Array::from_iter([Some(1_i32), Some(2), None, Some(4)]);
        let hashes = hash_arrays(&[&arr], 4).unwrap();
        assert_eq!(NULL_HASH, hashes[2]);
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn composite_key_order_matters() {
        let a = Array::from_iter([1_i64, 2]);
        let b = Array::from_iter([2_i64, 1]);
        let ab = hash_arrays(&[&a, &b], 2).unwrap();
        assert_ne!(ab[0], ab[1]);
    }

    #[test]
    fn same_value_same_hash_across_arrays() {
        let a = Array::from_iter(["x", "y"]);
        let b = Array::from_iter(["y", "x"]);
        let ha = hash_arrays(&[&a], 2).unwrap();
        let hb = hash_arrays(&[&b], 2).unwrap();
        assert_eq!(ha[0], hb[1]);
        assert_eq!(ha[1], hb[0]);
    }
}
