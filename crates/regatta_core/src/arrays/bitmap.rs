use std::fmt;

/// Length-aware bitmap used for array validity masks.
///
/// Bits are stored LSB-first within each byte.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    pub fn new_with_all_true(len: usize) -> Self {
        Bitmap {
            len,
            data: vec![u8::MAX; len.div_ceil(8)],
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Bitmap {
            len: 0,
            data: Vec::with_capacity(cap.div_ceil(8)),
        }
    }

    pub fn new_with_all_false(len: usize) -> Self {
        Bitmap {
            len,
            data: vec![0; len.div_ceil(8)],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the value of a bit.
    ///
    /// Panics if `idx` is out of bounds.
    #[inline]
    pub fn value(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bitmap index out of bounds");
        self.data[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// Set the value of a bit.
    ///
    /// Panics if `idx` is out of bounds.
    #[inline]
    pub fn set_unchecked(&mut self, idx: usize, val: bool) {
        assert!(idx < self.len, "bitmap index out of bounds");
        if val {
            self.data[idx / 8] |= 1 << (idx % 8);
        } else {
            self.data[idx / 8] &= !(1 << (idx % 8));
        }
    }

    pub fn push(&mut self, val: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        self.len += 1;
        self.set_unchecked(self.len - 1, val);
    }

    /// Count of set bits.
    pub fn count_trues(&self) -> usize {
        let mut count: usize = self.data.iter().map(|b| b.count_ones() as usize).sum();
        // Mask off trailing bits beyond len.
        let rem = self.len % 8;
        if rem != 0 {
            if let Some(&last) = self.data.last() {
                count -= (last & !((1u8 << rem) - 1)).count_ones() as usize;
            }
        }
        count
    }

    pub fn all_true(&self) -> bool {
        self.count_trues() == self.len
    }

    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter {
            bitmap: self,
            idx: 0,
        }
    }

    /// Raw bytes backing the bitmap. Trailing bits beyond `len` are
    /// unspecified.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn try_from_bytes(bytes: &[u8], len: usize) -> Option<Self> {
        if bytes.len() != len.div_ceil(8) {
            return None;
        }
        Some(Bitmap {
            len,
            data: bytes.to_vec(),
        })
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl FromIterator<bool> for Bitmap {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let mut bitmap = Bitmap::new_with_all_false(0);
        for val in iter {
            bitmap.push(val);
        }
        bitmap
    }
}

#[derive(Debug)]
pub struct BitmapIter<'a> {
    bitmap: &'a Bitmap,
    idx: usize,
}

impl Iterator for BitmapIter<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.idx >= self.bitmap.len() {
            return None;
        }
        let val = self.bitmap.value(self.idx);
        self.idx += 1;
        Some(val)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.bitmap.len() - self.idx;
        (rem, Some(rem))
    }
}
