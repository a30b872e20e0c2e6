use regatta_error::{RegattaError, Result};

use super::bitmap::Bitmap;

/// Contiguous storage for fixed-width values.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveStorage<T>(Vec<T>);

impl<T> PrimitiveStorage<T> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }
}

impl<T> From<Vec<T>> for PrimitiveStorage<T> {
    fn from(value: Vec<T>) -> Self {
        PrimitiveStorage(value)
    }
}

impl<T> AsRef<[T]> for PrimitiveStorage<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

/// Bit-packed storage for booleans.
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanStorage(Bitmap);

impl BooleanStorage {
    pub fn with_capacity(cap: usize) -> Self {
        BooleanStorage(Bitmap::with_capacity(cap))
    }

    pub fn push(&mut self, val: bool) {
        self.0.push(val);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn value(&self, idx: usize) -> bool {
        self.0.value(idx)
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.0
    }
}

impl From<Bitmap> for BooleanStorage {
    fn from(value: Bitmap) -> Self {
        BooleanStorage(value)
    }
}

impl FromIterator<bool> for BooleanStorage {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        BooleanStorage(iter.into_iter().collect())
    }
}

/// Offsets plus a shared byte heap for variable length values.
///
/// `offsets` always has one more entry than the row count.
#[derive(Debug, Clone, PartialEq)]
pub struct VarlenStorage {
    offsets: Vec<u32>,
    data: Vec<u8>,
}

impl VarlenStorage {
    pub fn with_capacity(cap: usize) -> Self {
        let mut offsets = Vec::with_capacity(cap + 1);
        offsets.push(0);
        VarlenStorage {
            offsets,
            data: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_push(&mut self, value: &[u8]) -> Result<()> {
        let new_len = self.data.len() + value.len();
        if new_len > u32::MAX as usize {
            return Err(RegattaError::new("Varlen storage byte limit exceeded")
                .with_field("len", new_len));
        }
        self.data.extend_from_slice(value);
        self.offsets.push(new_len as u32);
        Ok(())
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        let start = *self.offsets.get(idx)? as usize;
        let end = *self.offsets.get(idx + 1)? as usize;
        Some(&self.data[start..end])
    }

    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Rebuild storage from decoded offsets and heap bytes.
    pub fn try_from_parts(offsets: Vec<u32>, data: Vec<u8>) -> Result<Self> {
        if offsets.first() != Some(&0) {
            return Err(RegattaError::new("Varlen offsets must start at zero"));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(RegattaError::new("Varlen offsets must be non-decreasing"));
        }
        if offsets.last().copied().unwrap_or(0) as usize != data.len() {
            return Err(RegattaError::new("Varlen offsets do not cover data")
                .with_field("data_len", data.len()));
        }
        Ok(VarlenStorage { offsets, data })
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }
}

/// Varlen storage holding valid utf8.
#[derive(Debug, Clone, PartialEq)]
pub struct Utf8Storage(VarlenStorage);

impl Utf8Storage {
    pub fn with_capacity(cap: usize) -> Self {
        Utf8Storage(VarlenStorage::with_capacity(cap))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn try_push(&mut self, value: &str) -> Result<()> {
        self.0.try_push(value.as_bytes())
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        // Only utf8 goes in via try_push.
        self.0
            .get(idx)
            .map(|bytes| unsafe { std::str::from_utf8_unchecked(bytes) })
    }

    pub fn inner(&self) -> &VarlenStorage {
        &self.0
    }

    pub fn try_from_varlen(storage: VarlenStorage) -> Result<Self> {
        // `get` hands out &str without re-checking, so every slice boundary
        // has to be validated here, not just the heap as a whole.
        let data = std::str::from_utf8(storage.raw_data())?;
        for &off in storage.offsets() {
            if !data.is_char_boundary(off as usize) {
                return Err(
                    RegattaError::new("Varlen offset splits a utf8 character")
                        .with_field("offset", off),
                );
            }
        }
        Ok(Utf8Storage(storage))
    }
}

/// Varlen storage for arbitrary bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryStorage(VarlenStorage);

impl BinaryStorage {
    pub fn with_capacity(cap: usize) -> Self {
        BinaryStorage(VarlenStorage::with_capacity(cap))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn try_push(&mut self, value: &[u8]) -> Result<()> {
        self.0.try_push(value)
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.0.get(idx)
    }

    pub fn inner(&self) -> &VarlenStorage {
        &self.0
    }
}

impl From<VarlenStorage> for BinaryStorage {
    fn from(value: VarlenStorage) -> Self {
        BinaryStorage(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varlen_push_get() {
        let mut storage = VarlenStorage::with_capacity(2);
        storage.try_push(b"hello").unwrap();
        storage.try_push(b"").unwrap();
        storage.try_push(b"world").unwrap();

        assert_eq!(3, storage.len());
        assert_eq!(Some(b"hello".as_slice()), storage.get(0));
        assert_eq!(Some(b"".as_slice()), storage.get(1));
        assert_eq!(Some(b"world".as_slice()), storage.get(2));
        assert_eq!(None, storage.get(3));
    }

    #[test]
    fn utf8_rejects_invalid_bytes_from_varlen() {
        let mut storage = VarlenStorage::with_capacity(1);
        storage.try_push(&[0xff, 0xfe]).unwrap();
        assert!(Utf8Storage::try_from_varlen(storage).is_err());
    }

    #[test]
    fn utf8_rejects_offset_inside_multibyte_char() {
        // Heap is valid utf8 overall but the middle offset splits 'é'.
        let storage = VarlenStorage::try_from_parts(vec![0, 1, 2], "é".as_bytes().to_vec()).unwrap();
        assert!(Utf8Storage::try_from_varlen(storage).is_err());
    }

    #[test]
    fn utf8_accepts_multibyte_values_from_varlen() {
        let storage = VarlenStorage::try_from_parts(vec![0, 2, 5], "éxé".as_bytes().to_vec()).unwrap();
        let utf8 = Utf8Storage::try_from_varlen(storage).unwrap();
        assert_eq!(Some("é"), utf8.get(0));
        assert_eq!(Some("xé"), utf8.get(1));
    }
}
