use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

use regatta_error::{RegattaError, Result};

use super::bitmap::Bitmap;
use super::datatype::{DataType, PhysicalType};
use super::scalar::{Decimal128Scalar, ScalarValue};
use super::storage::{BinaryStorage, BooleanStorage, PrimitiveStorage, Utf8Storage};

/// Dispatch a generic function over the primitive physical types.
///
/// Boolean/Utf8/Binary fall through to the `$other` arm.
macro_rules! primitive_dispatch {
    ($phys:expr, $f:ident $(::<$($generics:ty),*>)? ($($args:expr),* $(,)?), $other:ident => $fallback:expr) => {
        match $phys {
            $crate::arrays::datatype::PhysicalType::Int8 => $f::<i8 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Int16 => $f::<i16 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Int32 => $f::<i32 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Int64 => $f::<i64 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Int128 => $f::<i128 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::UInt8 => $f::<u8 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::UInt16 => $f::<u16 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::UInt32 => $f::<u32 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::UInt64 => $f::<u64 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Float32 => $f::<f32 $($(, $generics)*)?>($($args),*),
            $crate::arrays::datatype::PhysicalType::Float64 => $f::<f64 $($(, $generics)*)?>($($args),*),
            $other => $fallback,
        }
    };
}

pub(crate) use primitive_dispatch;

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    /// Data type of the array.
    pub(crate) datatype: DataType,
    /// Validity mask, always materialized.
    ///
    /// Invariant: `validity.len() == data.len()`. Values at invalid positions
    /// are never read.
    pub(crate) validity: Bitmap,
    /// The physical data.
    pub(crate) data: ArrayData,
}

impl Array {
    pub fn new_with_validity(
        datatype: DataType,
        data: impl Into<ArrayData>,
        validity: Bitmap,
    ) -> Result<Self> {
        let data = data.into();
        if data.physical_type() != datatype.physical_type() {
            return Err(RegattaError::new("Array data not valid for data type")
                .with_field("datatype", datatype)
                .with_field("physical", data.physical_type()));
        }
        if validity.len() != data.len() {
            return Err(RegattaError::new("Validity length does not match data length")
                .with_field("validity_len", validity.len())
                .with_field("data_len", data.len()));
        }
        Ok(Array {
            datatype,
            validity,
            data,
        })
    }

    pub fn new_all_valid(datatype: DataType, data: impl Into<ArrayData>) -> Result<Self> {
        let data = data.into();
        let validity = Bitmap::new_with_all_true(data.len());
        Self::new_with_validity(datatype, data, validity)
    }

    /// Create an array of the given length with every value NULL.
    pub fn new_all_null(datatype: DataType, len: usize) -> Array {
        fn zeroed<T: PhysicalPrimitive>(len: usize) -> ArrayData {
            T::into_array_data(vec![T::default(); len])
        }

        let data = primitive_dispatch!(datatype.physical_type(), zeroed(len), other => {
            match other {
                PhysicalType::Boolean => {
                    ArrayData::Boolean(Arc::new(Bitmap::new_with_all_false(len).into()))
                }
                PhysicalType::Utf8 => {
                    let mut storage = Utf8Storage::with_capacity(len);
                    for _ in 0..len {
                        storage.try_push("").expect("empty push cannot overflow");
                    }
                    ArrayData::Utf8(Arc::new(storage))
                }
                PhysicalType::Binary => {
                    let mut storage = BinaryStorage::with_capacity(len);
                    for _ in 0..len {
                        storage.try_push(&[]).expect("empty push cannot overflow");
                    }
                    ArrayData::Binary(Arc::new(storage))
                }
                _ => unreachable!("all primitive types handled by dispatch"),
            }
        });

        Array {
            datatype,
            validity: Bitmap::new_with_all_false(len),
            data,
        }
    }

    pub fn from_primitive_values<T: PhysicalPrimitive>(
        datatype: DataType,
        values: Vec<T>,
        validity: Bitmap,
    ) -> Result<Self> {
        Self::new_with_validity(datatype, T::into_array_data(values), validity)
    }

    pub fn datatype(&self) -> &DataType {
        &self.datatype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validity(&self) -> &Bitmap {
        &self.validity
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    #[inline]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity.value(idx)
    }

    pub fn all_valid(&self) -> bool {
        self.validity.all_true()
    }

    /// Typed view of fixed-width storage.
    pub fn primitive_slice<T: PhysicalPrimitive>(&self) -> Result<&[T]> {
        T::storage(&self.data).map(|s| s.as_ref())
    }

    /// Physical boolean value, ignoring validity.
    pub fn bool_value(&self, idx: usize) -> Result<bool> {
        match &self.data {
            ArrayData::Boolean(s) => Ok(s.value(idx)),
            other => Err(physical_mismatch(PhysicalType::Boolean, other)),
        }
    }

    /// Physical string value, ignoring validity.
    pub fn utf8_value(&self, idx: usize) -> Result<&str> {
        match &self.data {
            ArrayData::Utf8(s) => s
                .get(idx)
                .ok_or_else(|| RegattaError::new("Index out of bounds").with_field("idx", idx)),
            other => Err(physical_mismatch(PhysicalType::Utf8, other)),
        }
    }

    /// Physical binary value, ignoring validity.
    pub fn binary_value(&self, idx: usize) -> Result<&[u8]> {
        match &self.data {
            ArrayData::Binary(s) => s
                .get(idx)
                .ok_or_else(|| RegattaError::new("Index out of bounds").with_field("idx", idx)),
            other => Err(physical_mismatch(PhysicalType::Binary, other)),
        }
    }

    /// Get the logical value at an index, taking validity into account.
    pub fn value(&self, idx: usize) -> Result<ScalarValue> {
        if idx >= self.len() {
            return Err(RegattaError::new("Index out of bounds")
                .with_field("idx", idx)
                .with_field("len", self.len()));
        }
        if !self.is_valid(idx) {
            return Ok(ScalarValue::Null);
        }

        Ok(match self.datatype {
            DataType::Boolean => self.bool_value(idx)?.into(),
            DataType::Int8 => self.primitive_slice::<i8>()?[idx].into(),
            DataType::Int16 => self.primitive_slice::<i16>()?[idx].into(),
            DataType::Int32 => self.primitive_slice::<i32>()?[idx].into(),
            DataType::Int64 => self.primitive_slice::<i64>()?[idx].into(),
            DataType::Int128 => self.primitive_slice::<i128>()?[idx].into(),
            DataType::UInt8 => self.primitive_slice::<u8>()?[idx].into(),
            DataType::UInt16 => self.primitive_slice::<u16>()?[idx].into(),
            DataType::UInt32 => self.primitive_slice::<u32>()?[idx].into(),
            DataType::UInt64 => self.primitive_slice::<u64>()?[idx].into(),
            DataType::Float32 => self.primitive_slice::<f32>()?[idx].into(),
            DataType::Float64 => self.primitive_slice::<f64>()?[idx].into(),
            DataType::Decimal128(meta) => ScalarValue::Decimal128(Decimal128Scalar {
                meta,
                value: self.primitive_slice::<i128>()?[idx],
            }),
            DataType::Date32 => ScalarValue::Date32(self.primitive_slice::<i32>()?[idx]),
            DataType::Timestamp => ScalarValue::Timestamp(self.primitive_slice::<i64>()?[idx]),
            DataType::Interval => ScalarValue::Interval(self.primitive_slice::<i128>()?[idx]),
            DataType::Utf8 => self.utf8_value(idx)?.into(),
            DataType::Binary => ScalarValue::Binary(self.binary_value(idx)?.to_vec()),
        })
    }
}

fn physical_mismatch(expected: PhysicalType, got: &ArrayData) -> RegattaError {
    RegattaError::new("Unexpected physical storage")
        .with_field("expected", expected)
        .with_field("got", got.physical_type())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Boolean(Arc<BooleanStorage>),
    Int8(Arc<PrimitiveStorage<i8>>),
    Int16(Arc<PrimitiveStorage<i16>>),
    Int32(Arc<PrimitiveStorage<i32>>),
    Int64(Arc<PrimitiveStorage<i64>>),
    Int128(Arc<PrimitiveStorage<i128>>),
    UInt8(Arc<PrimitiveStorage<u8>>),
    UInt16(Arc<PrimitiveStorage<u16>>),
    UInt32(Arc<PrimitiveStorage<u32>>),
    UInt64(Arc<PrimitiveStorage<u64>>),
    Float32(Arc<PrimitiveStorage<f32>>),
    Float64(Arc<PrimitiveStorage<f64>>),
    Utf8(Arc<Utf8Storage>),
    Binary(Arc<BinaryStorage>),
}

impl ArrayData {
    pub fn physical_type(&self) -> PhysicalType {
        match self {
            Self::Boolean(_) => PhysicalType::Boolean,
            Self::Int8(_) => PhysicalType::Int8,
            Self::Int16(_) => PhysicalType::Int16,
            Self::Int32(_) => PhysicalType::Int32,
            Self::Int64(_) => PhysicalType::Int64,
            Self::Int128(_) => PhysicalType::Int128,
            Self::UInt8(_) => PhysicalType::UInt8,
            Self::UInt16(_) => PhysicalType::UInt16,
            Self::UInt32(_) => PhysicalType::UInt32,
            Self::UInt64(_) => PhysicalType::UInt64,
            Self::Float32(_) => PhysicalType::Float32,
            Self::Float64(_) => PhysicalType::Float64,
            Self::Utf8(_) => PhysicalType::Utf8,
            Self::Binary(_) => PhysicalType::Binary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(s) => s.len(),
            Self::Int8(s) => s.len(),
            Self::Int16(s) => s.len(),
            Self::Int32(s) => s.len(),
            Self::Int64(s) => s.len(),
            Self::Int128(s) => s.len(),
            Self::UInt8(s) => s.len(),
            Self::UInt16(s) => s.len(),
            Self::UInt32(s) => s.len(),
            Self::UInt64(s) => s.len(),
            Self::Float32(s) => s.len(),
            Self::Float64(s) => s.len(),
            Self::Utf8(s) => s.len(),
            Self::Binary(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<BooleanStorage> for ArrayData {
    fn from(value: BooleanStorage) -> Self {
        ArrayData::Boolean(Arc::new(value))
    }
}

impl From<Utf8Storage> for ArrayData {
    fn from(value: Utf8Storage) -> Self {
        ArrayData::Utf8(Arc::new(value))
    }
}

impl From<BinaryStorage> for ArrayData {
    fn from(value: BinaryStorage) -> Self {
        ArrayData::Binary(Arc::new(value))
    }
}

/// Fixed-width value types with physical storage in an array.
///
/// This is the seam every generic kernel (hashing, aggregation, take, wire
/// encode) dispatches through.
pub trait PhysicalPrimitive:
    Copy + Default + Debug + PartialEq + PartialOrd + Send + Sync + 'static
{
    const PHYSICAL: PhysicalType;
    /// Encoded width in bytes.
    const SIZE: usize;

    fn storage(data: &ArrayData) -> Result<&PrimitiveStorage<Self>>;
    fn into_array_data(values: Vec<Self>) -> ArrayData;

    /// Total ordering, NULLs excluded. Floats order by `total_cmp`.
    fn total_cmp(&self, other: &Self) -> Ordering;

    fn encode_le(&self, buf: &mut Vec<u8>);
    /// Decode from exactly `SIZE` bytes.
    fn decode_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_physical_primitive {
    ($prim:ty, $variant:ident, $cmp:expr) => {
        impl PhysicalPrimitive for $prim {
            const PHYSICAL: PhysicalType = PhysicalType::$variant;
            const SIZE: usize = std::mem::size_of::<$prim>();

            fn storage(data: &ArrayData) -> Result<&PrimitiveStorage<Self>> {
                match data {
                    ArrayData::$variant(s) => Ok(s.as_ref()),
                    other => Err(physical_mismatch(Self::PHYSICAL, other)),
                }
            }

            fn into_array_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(Arc::new(values.into()))
            }

            fn total_cmp(&self, other: &Self) -> Ordering {
                #[allow(clippy::redundant_closure_call)]
                ($cmp)(self, other)
            }

            fn encode_le(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn decode_le(bytes: &[u8]) -> Self {
                <$prim>::from_le_bytes(bytes.try_into().expect("caller provides SIZE bytes"))
            }
        }
    };
}

impl_physical_primitive!(i8, Int8, |a: &i8, b: &i8| a.cmp(b));
impl_physical_primitive!(i16, Int16, |a: &i16, b: &i16| a.cmp(b));
impl_physical_primitive!(i32, Int32, |a: &i32, b: &i32| a.cmp(b));
impl_physical_primitive!(i64, Int64, |a: &i64, b: &i64| a.cmp(b));
impl_physical_primitive!(i128, Int128, |a: &i128, b: &i128| a.cmp(b));
impl_physical_primitive!(u8, UInt8, |a: &u8, b: &u8| a.cmp(b));
impl_physical_primitive!(u16, UInt16, |a: &u16, b: &u16| a.cmp(b));
impl_physical_primitive!(u32, UInt32, |a: &u32, b: &u32| a.cmp(b));
impl_physical_primitive!(u64, UInt64, |a: &u64, b: &u64| a.cmp(b));
impl_physical_primitive!(f32, Float32, |a: &f32, b: &f32| a.total_cmp(b));
impl_physical_primitive!(f64, Float64, |a: &f64, b: &f64| a.total_cmp(b));

impl<F> FromIterator<Option<F>> for Array
where
    F: Default,
    Array: FromIterator<F>,
{
    fn from_iter<T: IntoIterator<Item = Option<F>>>(iter: T) -> Self {
        let vals: Vec<_> = iter.into_iter().collect();
        let mut validity = Bitmap::new_with_all_true(vals.len());

        let mut new_vals = Vec::with_capacity(vals.len());
        for (idx, val) in vals.into_iter().enumerate() {
            match val {
                Some(val) => new_vals.push(val),
                None => {
                    new_vals.push(F::default());
                    validity.set_unchecked(idx, false);
                }
            }
        }

        let mut array = Array::from_iter(new_vals);
        array.validity = validity;
        array
    }
}

macro_rules! impl_primitive_from_iter {
    ($prim:ty, $datatype:ident) => {
        impl FromIterator<$prim> for Array {
            fn from_iter<T: IntoIterator<Item = $prim>>(iter: T) -> Self {
                let vals: Vec<_> = iter.into_iter().collect();
                let validity = Bitmap::new_with_all_true(vals.len());
                Array {
                    datatype: DataType::$datatype,
                    validity,
                    data: <$prim as PhysicalPrimitive>::into_array_data(vals),
                }
            }
        }
    };
}

impl_primitive_from_iter!(i8, Int8);
impl_primitive_from_iter!(i16, Int16);
impl_primitive_from_iter!(i32, Int32);
impl_primitive_from_iter!(i64, Int64);
impl_primitive_from_iter!(i128, Int128);
impl_primitive_from_iter!(u8, UInt8);
impl_primitive_from_iter!(u16, UInt16);
impl_primitive_from_iter!(u32, UInt32);
impl_primitive_from_iter!(u64, UInt64);
impl_primitive_from_iter!(f32, Float32);
impl_primitive_from_iter!(f64, Float64);

impl FromIterator<bool> for Array {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let storage: BooleanStorage = iter.into_iter().collect();
        let validity = Bitmap::new_with_all_true(storage.len());
        Array {
            datatype: DataType::Boolean,
            validity,
            data: storage.into(),
        }
    }
}

impl<'a> FromIterator<&'a str> for Array {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        let mut storage = Utf8Storage::with_capacity(lower);
        for s in iter {
            storage.try_push(s).expect("test-sized inputs");
        }
        let validity = Bitmap::new_with_all_true(storage.len());
        Array {
            datatype: DataType::Utf8,
            validity,
            data: storage.into(),
        }
    }
}

impl FromIterator<String> for Array {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        let vals: Vec<_> = iter.into_iter().collect();
        Array::from_iter(vals.iter().map(|s| s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::datatype::DecimalTypeMeta;

    #[test]
    fn from_iter_with_nulls() {
        let arr = Array::from_iter([Some(1_i64), None, Some(3)]);
        assert_eq!(3, arr.len());
        assert_eq!(ScalarValue::Int64(1), arr.value(0).unwrap());
        assert_eq!(ScalarValue::Null, arr.value(1).unwrap());
        assert_eq!(ScalarValue::Int64(3), arr.value(2).unwrap());
    }

    #[test]
    fn utf8_values() {
        let arr = Array::from_iter(["a", "", "xyz"]);
        assert_eq!(ScalarValue::from("xyz"), arr.value(2).unwrap());
        assert_eq!("", arr.utf8_value(1).unwrap());
    }

    #[test]
    fn all_null_typed() {
        let arr = Array::new_all_null(DataType::Float64, 4);
        assert_eq!(4, arr.len());
        assert!(!arr.is_valid(2));
        assert_eq!(ScalarValue::Null, arr.value(0).unwrap());
    }

    #[test]
    fn primitive_slice_type_mismatch() {
        let arr = Array::from_iter([1_i32, 2]);
        assert!(arr.primitive_slice::<i64>().is_err());
        assert!(arr.primitive_slice::<i32>().is_ok());
    }

    #[test]
    fn decimal_value() {
        let meta = DecimalTypeMeta::new(10, 2);
        let arr = Array::from_primitive_values::<i128>(
            DataType::Decimal128(meta),
            vec![12345, -500],
            Bitmap::new_with_all_true(2),
        )
        .unwrap();
        assert_eq!(
            ScalarValue::Decimal128(Decimal128Scalar { meta, value: -500 }),
            arr.value(1).unwrap()
        );
    }
}
